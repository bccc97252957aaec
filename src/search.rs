//! CLI search and recommendation over a persisted index.
//!
//! Both commands load the index once, run a single query, and print to
//! stdout. `--json` emits the same `{query, results, total}` shape as the
//! HTTP `/search` endpoint.

use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::Error;
use crate::generation::{create_generator, Recommender};
use crate::index::{IndexPaths, VectorIndex};
use crate::models::SearchHit;

#[derive(Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    results: &'a [SearchHit],
    total: usize,
}

/// Resolve the requested result count against `[retrieval]` bounds.
pub fn resolve_top_k(config: &Config, k: Option<usize>) -> Result<usize> {
    let k = k.unwrap_or(config.retrieval.default_top_k);
    if k < 1 || k > config.retrieval.max_top_k {
        bail!(
            "--k must be between 1 and {} (retrieval.max_top_k)",
            config.retrieval.max_top_k
        );
    }
    Ok(k)
}

/// Embedder for querying `index`, rejected up front when it cannot
/// produce vectors the index understands.
fn query_embedder(config: &Config, index: &VectorIndex) -> Result<Embedder> {
    if !config.embedding.is_enabled() {
        return Err(Error::EmbeddingDisabled.into());
    }
    let embedder = Embedder::from_config(&config.embedding)?;
    index.ensure_compatible(&embedder)?;
    Ok(embedder)
}

pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        bail!("query must not be empty");
    }
    let k = resolve_top_k(config, k)?;
    let index = VectorIndex::load(&IndexPaths::from_config(&config.paths))?;
    let embedder = query_embedder(config, &index)?;
    let results = index.query(query, &embedder, k).await?;

    if json {
        let out = SearchOutput {
            query,
            results: &results,
            total: results.len(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in results.iter().enumerate() {
        let meta = &hit.metadata;
        println!("{}. [{:.4}] {}", i + 1, hit.score, hit.id);
        if !meta.category.is_empty() {
            println!("    category: {}", meta.category);
        }
        if !meta.date.is_empty() {
            println!("    date: {}", meta.date);
        }
        if !meta.resolved.is_empty() {
            println!("    resolved: {}", meta.resolved);
        }
        println!("    problem: \"{}\"", meta.problem.replace('\n', " ").trim());
        if !meta.resolution.is_empty() {
            println!(
                "    resolution: \"{}\"",
                meta.resolution.replace('\n', " ").trim()
            );
        }
        println!();
    }

    Ok(())
}

pub async fn run_recommend(
    config: &Config,
    query: &str,
    k: Option<usize>,
) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        bail!("query must not be empty");
    }
    let k = resolve_top_k(config, k)?;
    let index = Arc::new(VectorIndex::load(&IndexPaths::from_config(&config.paths))?);
    let Some(generator) = create_generator(&config.generation)? else {
        bail!("Text generation is disabled. Set [generation] provider in config.");
    };
    let embedder = query_embedder(config, &index)?;
    let recommender = Recommender::new(index, embedder, generator)
        .prefer_resolved(config.retrieval.prefer_resolved);
    let out = recommender.recommend(query, k).await?;

    println!("{}", out.recommendation.trim());
    println!();
    println!("candidates ({})", out.backend);
    for (i, c) in out.candidates.iter().enumerate() {
        println!(
            "  {}. [{:.4}] {} resolved={}",
            i + 1,
            c.score,
            c.ticket_id,
            c.resolved.label()
        );
        if let Some(badge) = &c.badge {
            println!("     {}", badge);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_defaults_and_bounds() {
        let config = Config::default();
        assert_eq!(resolve_top_k(&config, None).unwrap(), 5);
        assert_eq!(resolve_top_k(&config, Some(20)).unwrap(), 20);
        assert!(resolve_top_k(&config, Some(0)).is_err());
        assert!(resolve_top_k(&config, Some(21)).is_err());
    }
}
