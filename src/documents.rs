//! Document Builder: projects normalized tickets into persisted documents.
//!
//! One [`Document`] per ticket, built verbatim from the normalized fields
//! (`id = ticket_id`, `text = embedding_text`). Persisted as JSON Lines in
//! insertion order; that file is the only input the index build needs.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::models::{Document, DocumentMetadata, TicketRecord};

pub fn build_document(record: &TicketRecord) -> Document {
    let id = record.ticket_id.trim().to_string();
    let text = record.embedding_text.trim().to_string();

    Document {
        metadata: DocumentMetadata {
            ticket_id: id.clone(),
            category: record.category.trim().to_string(),
            resolved: record.resolved.trim().to_string(),
            date: record.date.trim().to_string(),
            agent_name: record.agent_name.trim().to_string(),
            resolution: record.resolution.trim().to_string(),
            source_file: record.source_file.trim().to_string(),
            problem: text.clone(),
        },
        id,
        text,
    }
}

pub fn build_documents(records: &[TicketRecord]) -> Vec<Document> {
    records.iter().map(build_document).collect()
}

/// Write one JSON object per line, replacing any existing file.
pub fn write_documents(path: &Path, documents: &[Document]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut writer = BufWriter::new(std::fs::File::create(&tmp)?);
        for doc in documents {
            serde_json::to_writer(&mut writer, doc)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a documents file, skipping blank lines.
pub fn load_documents(path: &Path) -> Result<Vec<Document>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut documents = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        documents.push(serde_json::from_str(line)?);
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, issue: &str) -> TicketRecord {
        TicketRecord {
            ticket_id: id.to_string(),
            issue: issue.to_string(),
            description: "desc".to_string(),
            resolution: " Rebooted ".to_string(),
            category: "Network".to_string(),
            resolved: "True".to_string(),
            date: "2024-01-15".to_string(),
            agent_name: String::new(),
            source_file: "a.csv".to_string(),
            embedding_text: crate::normalize::embedding_text(issue, "desc"),
            extra: vec![("priority".to_string(), "high".to_string())],
        }
    }

    #[test]
    fn documents_copy_normalized_fields() {
        let doc = build_document(&record("TCKT-1", "VPN drops"));
        assert_eq!(doc.id, "TCKT-1");
        assert_eq!(doc.text, "Issue: VPN drops - Description: desc");
        assert_eq!(doc.metadata.ticket_id, "TCKT-1");
        assert_eq!(doc.metadata.resolution, "Rebooted");
        assert_eq!(doc.metadata.agent_name, "");
        assert_eq!(doc.metadata.problem, doc.text);
    }

    #[test]
    fn jsonl_preserves_order_and_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docs.jsonl");
        let docs = build_documents(&[record("TCKT-2", "b"), record("TCKT-1", "a")]);

        write_documents(&path, &docs).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["id"], "TCKT-2");
        assert_eq!(first["metadata"]["category"], "Network");

        let back = load_documents(&path).unwrap();
        assert_eq!(back, docs);
    }

    #[test]
    fn loader_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docs.jsonl");
        std::fs::write(
            &path,
            "{\"id\":\"TCKT-1\",\"text\":\"x\"}\n\n   \n{\"id\":\"TCKT-2\",\"text\":\"y\",\"metadata\":{}}\n",
        )
        .unwrap();
        let docs = load_documents(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].metadata, DocumentMetadata::default());
    }
}
