//! Provenance sidecars for graph files written by the CLI.
//!
//! Every file the CLI writes gets `<stem>.provenance.json` next to it,
//! recording the code revision, library version, command parameters, and the
//! table sizes of the written graph.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use shapefit::Reconstruction;

/// Table sizes of a written reconstruction.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct GraphCounts {
    pub shapes: usize,
    pub features: usize,
    pub matches: usize,
    pub sequences: usize,
}

impl GraphCounts {
    pub fn of(rec: &Reconstruction) -> Self {
        Self {
            shapes: rec.shapes().len(),
            features: rec.features().len(),
            matches: rec.matches().len(),
            sequences: rec.sequences().len(),
        }
    }
}

/// Sidecar document.
#[derive(Debug, Serialize)]
pub struct Provenance {
    pub code_rev: String,
    pub library_version: &'static str,
    pub command: &'static str,
    pub tag: Option<String>,
    pub params: Value,
    pub counts: Option<GraphCounts>,
    pub outputs: Vec<String>,
}

impl Provenance {
    pub fn new(command: &'static str, tag: Option<String>, params: Value) -> Self {
        Self {
            code_rev: current_git_rev(),
            library_version: shapefit::VERSION,
            command,
            tag,
            params,
            counts: None,
            outputs: Vec::new(),
        }
    }

    pub fn with_counts(mut self, counts: GraphCounts) -> Self {
        self.counts = Some(counts);
        self
    }
}

/// Write the sidecar for `artifact` and return its path.
pub fn write_sidecar<P: AsRef<Path>>(artifact: P, mut doc: Provenance) -> Result<PathBuf> {
    let artifact = artifact.as_ref();
    let path = provenance_path(artifact);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating provenance dir {}", parent.display()))?;
        }
    }
    doc.outputs = vec![artifact.to_string_lossy().into_owned()];
    fs::write(&path, serde_json::to_vec_pretty(&doc)?)
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::debug!(path = %path.display(), "wrote provenance sidecar");
    Ok(path)
}

fn provenance_path(artifact: &Path) -> PathBuf {
    let mut name = artifact
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("graph"));
    name.push(".provenance.json");
    artifact.with_file_name(name)
}

/// `GIT_COMMIT` (build time, then run time), else `git rev-parse HEAD`.
pub fn current_git_rev() -> String {
    if let Some(rev) = option_env!("GIT_COMMIT").filter(|s| !s.is_empty()) {
        return rev.to_string();
    }
    if let Ok(rev) = std::env::var("GIT_COMMIT") {
        if !rev.is_empty() {
            return rev;
        }
    }
    Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn provenance_path_replaces_extension() {
        let derived = provenance_path(Path::new("/tmp/out/scene.shfg"));
        assert_eq!(derived, Path::new("/tmp/out/scene.provenance.json"));
    }

    #[test]
    fn sidecar_records_counts_and_output() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("nested").join("scene.txt");
        let rec = Reconstruction::new();
        let doc = Provenance::new("convert", Some("run-7".into()), json!({"to": "ascii"}))
            .with_counts(GraphCounts::of(&rec));
        let path = write_sidecar(&artifact, doc).unwrap();
        let parsed: Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(parsed["outputs"][0], artifact.to_string_lossy().as_ref());
        assert_eq!(parsed["command"], "convert");
        assert_eq!(parsed["tag"], "run-7");
        assert_eq!(parsed["counts"]["shapes"], 0);
        assert_eq!(parsed["library_version"], shapefit::VERSION);
    }
}
