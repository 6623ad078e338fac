use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;
use url::Url;

use super::{ConnHelperError, Connection, ConnectionHelper};

pub const SCHEME: &str = "buildx";

/// Helper for `buildx://[<builder>]`. An empty host means the active
/// builder.
pub fn buildx(url: &Url) -> Result<ConnectionHelper, ConnHelperError> {
    if !url.path().is_empty() {
        return Err(ConnHelperError::PathNotSupported {
            scheme: SCHEME,
            url: url.to_string(),
        });
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(ConnHelperError::QueryNotSupported {
            scheme: SCHEME,
            url: url.to_string(),
        });
    }

    let builder = url.host_str().unwrap_or_default().to_string();
    Ok(ConnectionHelper::new(Arc::new(move || -> BoxFuture<'static, io::Result<Box<dyn Connection>>> {
        let args = dial_args(&builder);
        async move {
            let conn = CommandConn::spawn("docker", &args)?;
            Ok(Box::new(conn) as Box<dyn Connection>)
        }
        .boxed()
    })))
}

fn dial_args(builder: &str) -> Vec<String> {
    let mut args = vec!["buildx".to_string(), "dial-stdio".to_string(), "--progress=plain".to_string()];
    if !builder.is_empty() {
        args.push("--builder".to_string());
        args.push(builder.to_string());
    }
    args
}

/// A child process whose stdin/stdout form the connection. The child is
/// killed when the connection is dropped.
#[derive(Debug)]
pub struct CommandConn {
    _child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl CommandConn {
    pub fn spawn(program: &str, args: &[String]) -> io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| io::Error::other("child stdin unavailable"))?;
        let stdout = child.stdout.take().ok_or_else(|| io::Error::other("child stdout unavailable"))?;
        if let Some(stderr) = child.stderr.take() {
            let program = program.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(program = %program, "{line}");
                }
            });
        }

        Ok(Self {
            _child: child,
            stdin,
            stdout,
        })
    }
}

impl AsyncRead for CommandConn {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for CommandConn {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}
