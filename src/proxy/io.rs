//! Line readers and writers feeding and draining the engine

use crate::cancel::CancelToken;
use crate::proxy::models::ProxyAddress;
use crate::Result;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;

/// Prompt printed before reading candidates interactively
const STDIN_PROMPT: &str = "Enter proxy address IP:PORT";

/// Typing this on stdin ends the input
const STDIN_EXIT: &str = "exit";

/// Where candidate lines come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineSource {
    Stdin,
    File(PathBuf),
}

impl LineSource {
    /// `"stdin"` or a file path; a leading `~` expands to the home directory
    pub fn from_arg(arg: &str) -> Self {
        match arg {
            "stdin" => LineSource::Stdin,
            path => LineSource::File(expand_path(path)),
        }
    }

    /// Push trimmed lines into `tx` until the input ends.
    ///
    /// Returns the cancellation reason as an error if `cancel` fires first,
    /// and `Ok` early if the receiving side goes away.
    pub async fn read(&self, cancel: &CancelToken, tx: mpsc::Sender<String>) -> Result<()> {
        match self {
            LineSource::Stdin => {
                println!("{}", STDIN_PROMPT);
                let stdin = BufReader::new(tokio::io::stdin());
                forward_lines(stdin, cancel, &tx, true).await
            }
            LineSource::File(path) => {
                let file = File::open(path)
                    .await
                    .with_context(|| format!("Failed to open input file: {}", path.display()))?;
                forward_lines(BufReader::new(file), cancel, &tx, false).await
            }
        }
    }
}

/// Where confirmed proxies go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineSink {
    Stdout,
    File(PathBuf),
}

impl LineSink {
    /// `"stdout"` or a file path; a leading `~` expands to the home directory
    pub fn from_arg(arg: &str) -> Self {
        match arg {
            "stdout" => LineSink::Stdout,
            path => LineSink::File(expand_path(path)),
        }
    }

    /// Write one address per line until `rx` closes.
    ///
    /// After cancellation whatever is still buffered in `rx` is written out.
    /// A file sink then finishes cleanly; stdout reports the cancellation.
    pub async fn write(&self, cancel: &CancelToken, rx: mpsc::Receiver<ProxyAddress>) -> Result<()> {
        match self {
            LineSink::Stdout => {
                match write_lines(tokio::io::stdout(), cancel, rx).await? {
                    Some(reason) => Err(reason.into()),
                    None => Ok(()),
                }
            }
            LineSink::File(path) => {
                let file = File::create(path)
                    .await
                    .with_context(|| format!("Failed to create output file: {}", path.display()))?;
                write_lines(BufWriter::new(file), cancel, rx).await?;
                Ok(())
            }
        }
    }
}

/// Split a text block (form field, chat message) into candidate lines
pub fn read_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Closed channel pre-filled with `lines`, ready to hand to the engine
pub fn candidates_from(lines: Vec<String>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(lines.len().max(1));
    for line in lines {
        // capacity matches the number of lines
        let _ = tx.try_send(line);
    }
    rx
}

async fn forward_lines<R>(
    reader: R,
    cancel: &CancelToken,
    tx: &mpsc::Sender<String>,
    interactive: bool,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            biased;
            reason = cancel.cancelled() => return Err(reason.into()),
            line = lines.next_line() => line.context("Failed to read input line")?,
        };

        let Some(line) = line else {
            return Ok(());
        };
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if interactive && line == STDIN_EXIT {
            return Ok(());
        }

        tokio::select! {
            biased;
            reason = cancel.cancelled() => return Err(reason.into()),
            sent = tx.send(line.to_string()) => {
                if sent.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// Returns the cancellation reason if the sink stopped because of it
async fn write_lines<W>(
    writer: W,
    cancel: &CancelToken,
    mut rx: mpsc::Receiver<ProxyAddress>,
) -> Result<Option<crate::CancelReason>>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer;

    loop {
        tokio::select! {
            biased;
            address = rx.recv() => match address {
                Some(address) => write_address(&mut writer, &address).await?,
                None => {
                    writer.flush().await.context("Failed to flush output")?;
                    return Ok(None);
                }
            },
            reason = cancel.cancelled() => {
                while let Some(address) = rx.recv().await {
                    write_address(&mut writer, &address).await?;
                }
                writer.flush().await.context("Failed to flush output")?;
                return Ok(Some(reason));
            }
        }
    }
}

async fn write_address<W: AsyncWrite + Unpin>(writer: &mut W, address: &ProxyAddress) -> Result<()> {
    writer
        .write_all(format!("{}\n", address).as_bytes())
        .await
        .context("Failed to write output")
}

fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = std::env::var_os("HOME") {
            return Path::new(&home).join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}
