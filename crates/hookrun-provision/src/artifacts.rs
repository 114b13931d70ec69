use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use futures_util::StreamExt;
use hookrun_bridge::{CommandLine, CommandRunner, InvokeMode};
use hookrun_util::Theme;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{FetchError, ProvisionError};

/// Downloads one URL to one file. Resolves only after the file is fully
/// written and flushed.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError>;
}

pub struct HttpFetcher {
    client: Client,
    theme: Theme,
    show_progress: bool,
}

impl HttpFetcher {
    pub fn new(theme: Theme, show_progress: bool) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("hookrun/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            client,
            theme,
            show_progress,
        })
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        if total == 0 {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {bytes} ({bytes_per_sec})")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            return bar;
        }
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template(
                "{bar:40} | {percent}% | ETA: {eta} | {bytes}/{total_bytes}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█░"),
        );
        bar
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let total = resp.content_length().unwrap_or(0);
        eprintln!(
            "{}",
            self.theme
                .info(&format!("Downloading {url} to {}", destination.display()))
        );
        let bar = self.progress_bar(total);

        let partial = partial_path(destination);
        let write_err = |source| FetchError::Write {
            path: partial.clone(),
            source,
        };
        let mut file = tokio::fs::File::create(&partial).await.map_err(write_err)?;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(source) => {
                    bar.abandon();
                    let _ = fs::remove_file(&partial);
                    return Err(FetchError::Request {
                        url: url.to_string(),
                        source,
                    });
                }
            };
            if let Err(err) = file.write_all(&chunk).await {
                bar.abandon();
                let _ = fs::remove_file(&partial);
                return Err(write_err(err));
            }
            bar.inc(chunk.len() as u64);
        }

        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);
        bar.finish();

        fs::rename(&partial, destination).map_err(|source| FetchError::Write {
            path: destination.to_path_buf(),
            source,
        })?;
        tracing::info!("saved {url} to {}", destination.display());
        Ok(())
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(format!(".part-{}", Uuid::new_v4()));
    destination.with_file_name(name)
}

/// Runs `xz -d` on `archive`, which replaces it with the decompressed file
/// next to it. Returns that file's path.
pub async fn unpack_xz<R: CommandRunner>(
    runner: &R,
    xz: &Path,
    archive: &Path,
) -> Result<PathBuf, ProvisionError> {
    let line = CommandLine::new(xz)
        .arg("-d")
        .arg(archive.to_string_lossy());
    runner.invoke(&line, InvokeMode::strict()).await?;
    Ok(archive.with_extension(""))
}
