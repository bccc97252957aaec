//! Batch pipeline orchestration.
//!
//! Each stage reads the previous stage's artifact, so stages can be rerun
//! independently:
//!
//! ```text
//! input_dir ──unify──▶ snapshot CSV ──documents──▶ documents JSONL ──build──▶ index artifacts
//! ```
//!
//! `prepare` runs `unify` and `documents` back to back without re-reading
//! the snapshot. Every stage prints a short report to stdout; diagnostics go
//! through `tracing`.

use std::path::Path;

use crate::config::Config;
use crate::documents::{build_documents, load_documents, write_documents};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::{IndexPaths, VectorIndex};
use crate::models::{Document, TicketRecord};
use crate::normalize::{read_snapshot, unify_tables, write_snapshot};
use crate::sources::{read_sources, SkippedSource};

/// Result of reading and normalizing one input directory.
#[derive(Debug)]
pub struct Unified {
    pub records: Vec<TicketRecord>,
    pub sources: usize,
    pub skipped: Vec<SkippedSource>,
}

/// Read every source in `dir` and normalize the combined rows.
pub fn unify_dir(dir: &Path) -> Result<Unified> {
    let scan = read_sources(dir)?;
    let records = unify_tables(&scan.tables);
    Ok(Unified {
        records,
        sources: scan.tables.len(),
        skipped: scan.skipped,
    })
}

/// `tix unify`: sources → normalized snapshot.
pub fn run_unify(config: &Config, input: Option<&Path>) -> Result<Unified> {
    let dir = input.unwrap_or(config.paths.input_dir.as_path());
    let unified = unify_dir(dir)?;
    let snapshot = config.paths.unified_csv_path();
    write_snapshot(&snapshot, &unified.records)?;
    tracing::info!(rows = unified.records.len(), path = %snapshot.display(), "wrote unified snapshot");

    println!("unify {}", dir.display());
    print_unify_counts(&unified);
    println!("  snapshot: {}", snapshot.display());
    println!("ok");
    Ok(unified)
}

/// `tix documents`: snapshot → documents JSONL.
pub fn run_documents(config: &Config) -> Result<Vec<Document>> {
    let records = read_snapshot(&config.paths.unified_csv_path())?;
    let documents = build_documents(&records);
    let path = config.paths.documents_path();
    write_documents(&path, &documents)?;
    tracing::info!(documents = documents.len(), path = %path.display(), "wrote documents");

    println!("documents");
    println!("  documents: {}", documents.len());
    println!("  output: {}", path.display());
    println!("ok");
    Ok(documents)
}

/// `tix prepare`: unify and documents in one pass.
pub fn run_prepare(config: &Config, input: Option<&Path>) -> Result<Vec<Document>> {
    let dir = input.unwrap_or(config.paths.input_dir.as_path());
    let unified = unify_dir(dir)?;

    let snapshot = config.paths.unified_csv_path();
    write_snapshot(&snapshot, &unified.records)?;
    let documents = build_documents(&unified.records);
    let docs_path = config.paths.documents_path();
    write_documents(&docs_path, &documents)?;
    tracing::info!(
        rows = unified.records.len(),
        documents = documents.len(),
        "prepared ticket data"
    );

    println!("prepare {}", dir.display());
    print_unify_counts(&unified);
    println!("  documents: {}", documents.len());
    println!("  snapshot: {}", snapshot.display());
    println!("  output: {}", docs_path.display());
    println!("ok");
    Ok(documents)
}

/// `tix build`: documents JSONL → persisted index.
pub async fn run_build(config: &Config, embedder: &Embedder) -> Result<VectorIndex> {
    if !config.embedding.is_enabled() {
        return Err(Error::EmbeddingDisabled);
    }
    let docs_path = config.paths.documents_path();
    if !docs_path.is_file() {
        return Err(Error::DocumentsNotFound { path: docs_path });
    }
    let documents = load_documents(&docs_path)?;
    tracing::info!(
        documents = documents.len(),
        model = embedder.model_name(),
        "building index"
    );

    let index = VectorIndex::build(&documents, embedder).await?;
    let paths = IndexPaths::from_config(&config.paths);
    index.save(&paths)?;

    println!("build");
    println!("  documents read: {}", documents.len());
    println!("  indexed: {}", index.len());
    println!("  dims: {}", index.dims());
    println!("  model: {}", embedder.model_name());
    println!("  index: {}", paths.index.display());
    println!("ok");
    Ok(index)
}

fn print_unify_counts(unified: &Unified) {
    println!("  sources read: {}", unified.sources);
    if !unified.skipped.is_empty() {
        println!("  sources skipped: {}", unified.skipped.len());
        for s in &unified.skipped {
            println!("    {}: {}", s.file, s.reason);
        }
    }
    println!("  rows: {}", unified.records.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.paths.input_dir = dir.path().join("tickets");
        config.paths.output_dir = dir.path().join("processed");
        config
    }

    fn seed(dir: &TempDir) {
        let input = dir.path().join("tickets");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(
            input.join("a.csv"),
            "Ticket ID,Issue,Description,Resolution,Category,Resolved,Date\n\
             4412,VPN drops,disconnects,Reinstalled client,Network,True,01/15/2024\n\
             n/a,Printer offline,no network,,Hardware,false,\n",
        )
        .unwrap();
        std::fs::write(
            input.join("b.jsonl"),
            "{\"ticket_id\":\"T-9\",\"issue\":\"Password reset\",\"description\":\"locked out\"}\n",
        )
        .unwrap();
    }

    #[test]
    fn unify_then_documents_matches_prepare() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let config = config_for(&dir);

        let unified = run_unify(&config, None).unwrap();
        assert_eq!(unified.sources, 2);
        assert_eq!(unified.records[1].ticket_id, "TCKT-100001");
        assert!(config.paths.unified_csv_path().is_file());

        let staged = run_documents(&config).unwrap();
        let prepared = run_prepare(&config, None).unwrap();
        assert_eq!(staged, prepared);
        assert_eq!(prepared[0].id, "TCKT-4412");
        assert_eq!(prepared[0].metadata.date, "2024-01-15");
        assert_eq!(prepared[2].metadata.source_file, "b.jsonl");
    }

    #[tokio::test]
    async fn build_with_embedding_disabled_fails_early() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let mut config = config_for(&dir);
        config.embedding.provider = "disabled".to_string();
        run_prepare(&config, None).unwrap();

        let embedder = Embedder::from_config(&config.embedding).unwrap();
        assert!(matches!(
            run_build(&config, &embedder).await,
            Err(Error::EmbeddingDisabled)
        ));
        assert!(!config.paths.index_path().exists());
    }

    #[test]
    fn documents_without_snapshot_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        assert!(matches!(
            run_documents(&config),
            Err(Error::SnapshotNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn build_persists_a_loadable_index() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let config = config_for(&dir);
        let embedder = Embedder::new(Arc::new(HashingProvider::new(128)), 2);

        assert!(matches!(
            run_build(&config, &embedder).await,
            Err(Error::DocumentsNotFound { .. })
        ));

        run_prepare(&config, None).unwrap();
        let built = run_build(&config, &embedder).await.unwrap();
        assert_eq!(built.len(), 3);

        let loaded = VectorIndex::load(&IndexPaths::from_config(&config.paths)).unwrap();
        assert_eq!(loaded.ids(), built.ids());
    }
}
