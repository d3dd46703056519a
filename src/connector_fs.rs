//! Local directory source.
//!
//! Walks `ingest.filesystem.root` and picks up every file matching the
//! include globs and none of the exclude globs. HTML files are reduced to
//! text with the same extraction as the web source; anything else is read
//! as plain text, with the first non-empty line as its title.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::FilesystemSourceConfig;
use crate::ingest::EssaySource;
use crate::models::{Essay, EssayRef};
use crate::scrape::extract_essay;

pub struct FilesystemSource {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    base_url: Option<String>,
}

impl FilesystemSource {
    pub fn new(config: &FilesystemSourceConfig) -> Result<Self> {
        if !config.root.exists() {
            bail!(
                "Filesystem source root does not exist: {}",
                config.root.display()
            );
        }

        let mut excludes = vec!["**/.git/**".to_string()];
        excludes.extend(config.exclude_globs.clone());

        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            base_url: config
                .base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    fn url_for(&self, path: &Path, relative: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}/{}", base, relative.replace('\\', "/")),
            None => {
                let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
                format!("file://{}", absolute.display())
            }
        }
    }
}

#[async_trait]
impl EssaySource for FilesystemSource {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn list(&self) -> Result<Vec<EssayRef>> {
        let mut refs = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            refs.push(EssayRef {
                url: self.url_for(path, &rel_str),
                path: Some(path.to_path_buf()),
            });
        }

        // Deterministic order
        refs.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(refs)
    }

    async fn fetch(&self, essay: &EssayRef) -> Result<Essay> {
        let path = essay
            .path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("{} has no local path", essay.url))?;
        let body = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let updated_at = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        let is_html = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"));

        let mut essay = if is_html {
            extract_essay(&body, &essay.url)
        } else {
            plain_text_essay(&body, &essay.url, path)
        };
        essay.updated_at = updated_at;
        Ok(essay)
    }
}

fn plain_text_essay(body: &str, url: &str, path: &Path) -> Essay {
    let title = body
        .lines()
        .map(|l| l.trim().trim_start_matches('#').trim())
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().to_string()))
        .unwrap_or_else(|| url.to_string());
    Essay {
        url: url.to_string(),
        title,
        text: body.trim().to_string(),
        updated_at: None,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
