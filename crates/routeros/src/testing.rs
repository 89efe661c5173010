//! Scripted router speaking the real wire framing, for client tests.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::api::codec;

type Handler = dyn Fn(&[String]) -> Vec<Vec<String>> + Send + Sync;

pub(crate) struct FakeRouter {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl FakeRouter {
    /// Every request sentence is passed to `handler`; the returned sentences are
    /// written back. The request's `.tag=` is appended to untagged replies.
    /// `/quit` ends the connection.
    pub(crate) async fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> Vec<Vec<String>> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler: Arc<Handler> = Arc::new(handler);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, handler.clone()));
            }
        });
        Self { addr, handle }
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for FakeRouter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_connection(stream: TcpStream, handler: Arc<Handler>) {
    let mut stream = BufStream::new(stream);
    while let Ok(request) = codec::read_sentence(&mut stream).await {
        if request[0] == "/quit" {
            break;
        }
        let tag = request
            .iter()
            .find(|w| w.starts_with(".tag="))
            .cloned();
        for mut sentence in handler(&request) {
            if let Some(tag) = &tag {
                if !sentence.iter().any(|w| w.starts_with(".tag=")) {
                    sentence.push(tag.clone());
                }
            }
            if stream.write_all(&codec::encode_sentence(&sentence)).await.is_err() {
                return;
            }
        }
        if stream.flush().await.is_err() {
            return;
        }
    }
}
