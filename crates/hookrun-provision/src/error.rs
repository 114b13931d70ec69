use std::{io, path::PathBuf};

use hookrun_bridge::BridgeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("download of {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} failed with status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Please root your device first.")]
    NotRooted { whoami: String },
    #[error("Can not find frida package, maybe install frida first.")]
    FrameworkMissing,
    #[error("Can not find device arch, check \"getprop ro.product.cpu.abi\".")]
    ArchUnknown,
    #[error("Unsupported arch: {0}")]
    UnsupportedArch(String),
    #[error("failed to prepare {}: {source}", .path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
