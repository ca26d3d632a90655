use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{
    fs,
    io::{AsyncWrite, AsyncWriteExt},
};
use tracing::{info, warn};

use crate::Result;

/// Files per folder before rolling over to the next one.
pub const FOLDER_CAP: usize = 1000;

/// Where an accepted image ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedArtifact {
    pub location: String,
    pub bytes: usize,
}

#[async_trait]
pub trait ArtifactStore: Send {
    async fn save(&mut self, name: &str, bytes: &[u8]) -> Result<PersistedArtifact>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderLayout {
    /// `YYYYMMDD`, then `YYYYMMDD-2`, `YYYYMMDD-3`, ...
    Dated(String),
    /// `001`, `002`, ... continuing after the highest existing folder.
    Sequential,
}

/// Writes images into folders under `root`, at most [`FOLDER_CAP`] per folder.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    layout: FolderLayout,
    cap: usize,
    current: Option<CurrentFolder>,
}

#[derive(Debug)]
struct CurrentFolder {
    path: PathBuf,
    seq: u32,
    files: usize,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, layout: FolderLayout) -> Self {
        Self::with_cap(root, layout, FOLDER_CAP)
    }

    pub fn with_cap(root: impl Into<PathBuf>, layout: FolderLayout, cap: usize) -> Self {
        Self {
            root: root.into(),
            layout,
            cap: cap.max(1),
            current: None,
        }
    }

    fn folder_name(&self, seq: u32) -> String {
        match &self.layout {
            FolderLayout::Dated(date) if seq <= 1 => date.clone(),
            FolderLayout::Dated(date) => format!("{date}-{seq}"),
            FolderLayout::Sequential => format!("{seq:03}"),
        }
    }

    /// Returns the folder to write into, opening or rolling over as needed.
    async fn folder(&mut self) -> Result<PathBuf> {
        let seq = match &self.current {
            Some(cur) if cur.files < self.cap => return Ok(cur.path.clone()),
            Some(cur) => cur.seq + 1,
            None => match self.layout {
                FolderLayout::Dated(_) => 1,
                // Every run starts a fresh numbered folder.
                FolderLayout::Sequential => highest_numbered_folder(&self.root).await? + 1,
            },
        };
        self.open_folder(seq).await
    }

    async fn open_folder(&mut self, mut seq: u32) -> Result<PathBuf> {
        loop {
            let path = self.root.join(self.folder_name(seq));
            fs::create_dir_all(&path).await?;
            let files = count_files(&path).await?;
            if files < self.cap {
                info!(folder = %path.display(), files, "writing into folder");
                self.current = Some(CurrentFolder {
                    path: path.clone(),
                    seq,
                    files,
                });
                return Ok(path);
            }
            seq += 1;
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn save(&mut self, name: &str, bytes: &[u8]) -> Result<PersistedArtifact> {
        let path = self.folder().await?.join(name);
        // `create_new` so a name collision errors instead of overwriting.
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        write_or_remove(&path, file, bytes).await?;

        if let Some(cur) = self.current.as_mut() {
            cur.files += 1;
        }
        Ok(PersistedArtifact {
            location: path.display().to_string(),
            bytes: bytes.len(),
        })
    }
}

/// Writes `bytes` to the freshly created `path`, removing it again if the write fails.
async fn write_or_remove<W: AsyncWrite + Unpin>(path: &Path, mut out: W, bytes: &[u8]) -> Result<()> {
    let written: std::io::Result<()> = async {
        out.write_all(bytes).await?;
        out.flush().await
    }
    .await;
    if let Err(e) = written {
        drop(out);
        if let Err(rm) = fs::remove_file(path).await {
            warn!(path = %path.display(), error = %rm, "couldn't remove partial file");
        }
        return Err(e.into());
    }
    Ok(())
}

async fn count_files(dir: &Path) -> Result<usize> {
    let mut entries = fs::read_dir(dir).await?;
    let mut n = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            n += 1;
        }
    }
    Ok(n)
}

async fn highest_numbered_folder(root: &Path) -> Result<u32> {
    fs::create_dir_all(root).await?;
    let mut entries = fs::read_dir(root).await?;
    let mut highest = 0;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
            highest = highest.max(name.parse().unwrap_or(0));
        }
    }
    Ok(highest)
}
