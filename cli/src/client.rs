//! WebSocket client for the newsroom server

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::messages::{Envelope, ServerEvent};

/// A connection bound to one document and one identity
pub struct NewsroomClient {
    document_id: String,
    user_id: String,
    /// Blocks this identity already held when it joined
    held: HashSet<String>,
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<ServerEvent>,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<()>,
}

impl NewsroomClient {
    /// Connect to a newsroom server
    pub async fn connect(url: &str, document_id: &str, user_id: &str) -> Result<Self> {
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Channel for outgoing messages
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(32);

        // Channel for incoming parsed events
        let (in_tx, in_rx) = mpsc::channel::<ServerEvent>(32);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = out_rx.recv() => {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Some(result) = read.next() => {
                        match result {
                            Ok(Message::Text(text)) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if in_tx.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!("Failed to parse event: {} - {}", e, text);
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => break,
                            Err(e) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
        });

        tracing::info!("Connected successfully");

        Ok(Self {
            document_id: document_id.to_string(),
            user_id: user_id.to_string(),
            held: HashSet::new(),
            tx: out_tx,
            rx: in_rx,
            handle,
        })
    }

    fn envelope(&self, kind: &str, payload: serde_json::Value) -> Envelope {
        Envelope {
            kind: kind.to_string(),
            document_id: self.document_id.clone(),
            sender_id: self.user_id.clone(),
            payload,
        }
    }

    async fn send(&self, kind: &str, payload: serde_json::Value) -> Result<()> {
        let json = serde_json::to_string(&self.envelope(kind, payload))?;
        self.tx
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| anyhow!("Failed to send message: {}", e))
    }

    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    /// Wait until `done` accepts an event; server errors end the wait
    async fn wait_for<F>(&mut self, mut done: F) -> Result<ServerEvent>
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        while let Some(event) = self.recv().await {
            if let ServerEvent::Error { message } = &event {
                return Err(anyhow!("Server error: {}", message));
            }
            if done(&event) {
                return Ok(event);
            }
        }
        Err(anyhow!("Connection closed"))
    }

    /// Join the document; returns the snapshot
    pub async fn join(&mut self, role: &str, display_name: &str) -> Result<ServerEvent> {
        self.send(
            "join",
            serde_json::json!({"role": role, "displayName": display_name}),
        )
        .await?;
        let state = self
            .wait_for(|e| matches!(e, ServerEvent::DocumentState { .. }))
            .await?;
        self.held = state.locks_held_by(&self.user_id).into_iter().collect();
        Ok(state)
    }

    /// Request a block lock and wait until it is ours
    pub async fn acquire(&mut self, block_id: &str) -> Result<()> {
        // The server sends no event for a lock we already hold
        if self.held.contains(block_id) {
            return Ok(());
        }
        self.send(
            "request-block-lock",
            serde_json::json!({"blockId": block_id}),
        )
        .await?;

        let me = self.user_id.clone();
        let block = block_id.to_string();
        self.wait_for(|event| match event {
            ServerEvent::BlockLocked {
                block_id, holder, ..
            }
            | ServerEvent::BlockTransferred {
                block_id, holder, ..
            } => *block_id == block && *holder == me,
            ServerEvent::StaleLockReleased {
                block_id,
                new_holder: Some(holder),
                ..
            } => *block_id == block && *holder == me,
            ServerEvent::LockQueued { position, .. } => {
                println!("Waiting for {} (position {})", block, position);
                false
            }
            _ => false,
        })
        .await?;
        Ok(())
    }

    pub async fn release(&mut self, block_id: &str) -> Result<()> {
        self.held.remove(block_id);
        self.send(
            "release-block-lock",
            serde_json::json!({"blockId": block_id}),
        )
        .await
    }

    /// Replace a block's content; returns the new block version
    pub async fn edit(&mut self, block_id: &str, content: serde_json::Value) -> Result<u64> {
        self.send(
            "edit-block",
            serde_json::json!({"blockId": block_id, "content": content}),
        )
        .await?;

        let me = self.user_id.clone();
        let block = block_id.to_string();
        let event = self
            .wait_for(|event| {
                matches!(event, ServerEvent::BlockUpdated { block_id, author, .. }
                    if *block_id == block && *author == me)
            })
            .await?;
        match event {
            ServerEvent::BlockUpdated { version, .. } => Ok(version),
            _ => Err(anyhow!("Unexpected event")),
        }
    }

    pub async fn comment(&mut self, text: &str) -> Result<u64> {
        self.send("comment", serde_json::json!({"text": text})).await?;

        let me = self.user_id.clone();
        let event = self
            .wait_for(|event| {
                matches!(event, ServerEvent::CommentAdded { comment, .. } if comment.author == me)
            })
            .await?;
        match event {
            ServerEvent::CommentAdded { comment, .. } => Ok(comment.id),
            _ => Err(anyhow!("Unexpected event")),
        }
    }

    /// Send an approval decision; returns the new status
    pub async fn approve(&mut self, action: &str) -> Result<String> {
        self.send("approve", serde_json::json!({"action": action}))
            .await?;

        let me = self.user_id.clone();
        let event = self
            .wait_for(|event| {
                matches!(event, ServerEvent::StatusChanged { approver, .. } if *approver == me)
            })
            .await?;
        match event {
            ServerEvent::StatusChanged { new_status, .. } => Ok(new_status),
            _ => Err(anyhow!("Unexpected event")),
        }
    }

    /// Listen for events until callback returns false
    pub async fn listen<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(ServerEvent) -> bool,
    {
        while let Some(event) = self.recv().await {
            if !callback(event) {
                break;
            }
        }
        Ok(())
    }
}
