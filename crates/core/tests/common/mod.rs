//! Shared test helpers for core integration tests.
#![allow(dead_code)]

use benchenv_core::fixture::HttpClient;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Build an in-memory zip archive from `(path, content)` entries
pub fn zip_archive(entries: &[(&str, &str)]) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    Bytes::from(buf.into_inner())
}

/// Stored archive of `papers/` whose second file fails its CRC check
pub fn corrupt_papers_archive() -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("papers/a.txt", options).unwrap();
        writer.write_all(b"first paper").unwrap();
        writer.start_file("papers/b.txt", options).unwrap();
        writer.write_all(b"second paper, intact").unwrap();
        writer.finish().unwrap();
    }
    let mut bytes = buf.into_inner();
    let needle = b"second paper, intact";
    let at = bytes
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap();
    bytes[at..at + needle.len()].copy_from_slice(b"second paper, broken");
    Bytes::from(bytes)
}

/// HTTP client serving fixed bodies by URL and recording requests
#[derive(Clone, Default)]
pub struct StaticHttpClient {
    bodies: Arc<HashMap<String, Bytes>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StaticHttpClient {
    pub fn new(bodies: impl IntoIterator<Item = (String, Bytes)>) -> Self {
        Self {
            bodies: Arc::new(bodies.into_iter().collect()),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl HttpClient for StaticHttpClient {
    async fn get(
        &self,
        url: &str,
    ) -> std::result::Result<Bytes, Box<dyn std::error::Error + Send + Sync>> {
        self.requests.lock().unwrap().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| format!("no fixture served at {}", url).into())
    }
}

/// Sorted relative paths and contents of every file under `root`
pub fn snapshot(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .to_string();
            (rel, std::fs::read(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}
