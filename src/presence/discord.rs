// Discord IPC connection
// Speaks the local Discord RPC protocol: little-endian opcode and length
// header followed by a JSON payload

use super::{Presence, PresenceConnection};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

const OP_HANDSHAKE: u32 = 0;
const OP_FRAME: u32 = 1;
const OP_CLOSE: u32 = 2;

/// Largest payload we are willing to read from Discord
const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Discord rejects text fields longer than this
const MAX_TEXT_LEN: usize = 128;

#[cfg(unix)]
type IpcStream = tokio::net::UnixStream;

#[cfg(windows)]
type IpcStream = tokio::net::windows::named_pipe::NamedPipeClient;

#[cfg(unix)]
async fn open_socket() -> Result<IpcStream> {
    let base = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .find_map(|var| std::env::var_os(var))
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("/tmp"));

    // Plain, Flatpak and Snap installs put the socket in different places
    let dirs = [
        base.clone(),
        base.join("app/com.discordapp.Discord"),
        base.join("snap.discord"),
    ];

    for dir in &dirs {
        for i in 0..10 {
            let path = dir.join(format!("discord-ipc-{}", i));
            if let Ok(stream) = IpcStream::connect(&path).await {
                log::debug!("Connected to Discord IPC socket {:?}", path);
                return Ok(stream);
            }
        }
    }

    anyhow::bail!("No Discord IPC socket found under {:?}", base)
}

#[cfg(windows)]
async fn open_socket() -> Result<IpcStream> {
    use tokio::net::windows::named_pipe::ClientOptions;

    for i in 0..10 {
        let path = format!(r"\\?\pipe\discord-ipc-{}", i);
        if let Ok(stream) = ClientOptions::new().open(&path) {
            log::debug!("Connected to Discord IPC pipe {}", path);
            return Ok(stream);
        }
    }

    anyhow::bail!("No Discord IPC pipe found")
}

async fn write_frame<W>(writer: &mut W, opcode: u32, payload: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(payload).context("Failed to serialize IPC payload")?;
    let len = u32::try_from(body.len()).context("IPC payload too large")?;

    let mut frame = Vec::with_capacity(8 + body.len());
    frame.extend_from_slice(&opcode.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);

    writer.write_all(&frame).await.context("Failed to write IPC frame")?;
    writer.flush().await.context("Failed to flush IPC frame")?;
    Ok(())
}

async fn read_frame<R>(reader: &mut R) -> Result<(u32, Value)>
where
    R: AsyncRead + Unpin,
{
    let opcode = reader.read_u32_le().await.context("Failed to read IPC header")?;
    let len = reader.read_u32_le().await.context("Failed to read IPC header")?;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("IPC frame of {} bytes is too large", len);
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read IPC payload")?;

    let payload = serde_json::from_slice(&body).context("Malformed IPC payload")?;
    Ok((opcode, payload))
}

/// Fail on close frames and error events
fn check_response(opcode: u32, payload: &Value) -> Result<()> {
    if opcode == OP_CLOSE {
        anyhow::bail!(
            "Discord closed the connection: {}",
            payload["message"].as_str().unwrap_or("no reason given")
        );
    }
    if payload["evt"] == "ERROR" {
        anyhow::bail!(
            "Discord rejected the request: {}",
            payload["data"]["message"].as_str().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn handshake<S>(stream: &mut S, client_id: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_frame(stream, OP_HANDSHAKE, &json!({ "v": 1, "client_id": client_id })).await?;

    let (opcode, payload) = read_frame(stream).await?;
    check_response(opcode, &payload)?;

    if payload["evt"] != "READY" {
        anyhow::bail!("Unexpected handshake response: {}", payload);
    }
    Ok(())
}

async fn request<S>(stream: &mut S, payload: &Value) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_frame(stream, OP_FRAME, payload).await?;
    let (opcode, response) = read_frame(stream).await?;
    check_response(opcode, &response)
}

fn fit(text: &str) -> String {
    text.chars().take(MAX_TEXT_LEN).collect()
}

/// Activity object for a SET_ACTIVITY command
fn activity(presence: &Presence) -> Value {
    let mut activity = json!({
        "type": 2, // listening
        "details": fit(&presence.details),
        "state": fit(&presence.state),
        "assets": {
            "large_image": presence.large_image,
            "large_text": fit(&presence.large_text),
            "small_image": presence.small_image,
            "small_text": fit(&presence.small_text),
        },
    });

    if presence.start.is_some() || presence.end.is_some() {
        let mut timestamps = serde_json::Map::new();
        if let Some(start) = presence.start {
            timestamps.insert("start".to_string(), json!(start.timestamp_millis()));
        }
        if let Some(end) = presence.end {
            timestamps.insert("end".to_string(), json!(end.timestamp_millis()));
        }
        activity["timestamps"] = Value::Object(timestamps);
    }

    activity
}

fn set_activity_command(activity: Option<Value>) -> Value {
    json!({
        "cmd": "SET_ACTIVITY",
        "args": {
            "pid": std::process::id(),
            "activity": activity,
        },
        "nonce": Uuid::new_v4().to_string(),
    })
}

/// Connection to the local Discord client
///
/// A broken connection is dropped and re-established on the next send.
pub struct DiscordIpc {
    client_id: String,
    stream: Mutex<Option<IpcStream>>,
}

impl DiscordIpc {
    pub fn new(client_id: String) -> Self {
        Self {
            client_id,
            stream: Mutex::new(None),
        }
    }

    async fn open(&self) -> Result<IpcStream> {
        let mut stream = open_socket().await?;
        handshake(&mut stream, &self.client_id)
            .await
            .context("Discord handshake failed")?;
        Ok(stream)
    }

    async fn send_activity(&self, activity: Option<Value>) -> Result<()> {
        let mut guard = self.stream.lock().await;

        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => {
                log::info!("Reconnecting to Discord");
                self.open().await?
            }
        };

        // A stream that failed mid-request is not put back
        request(&mut stream, &set_activity_command(activity)).await?;
        *guard = Some(stream);
        Ok(())
    }
}

impl PresenceConnection for DiscordIpc {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        Ok(())
    }

    async fn set_presence(&self, presence: &Presence) -> Result<()> {
        self.send_activity(Some(activity(presence))).await
    }

    async fn clear_presence(&self) -> Result<()> {
        self.send_activity(None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tokio::io::duplex;

    #[tokio::test]
    async fn frames_have_little_endian_header() {
        let (mut client, mut server) = duplex(1024);
        write_frame(&mut client, OP_FRAME, &json!({ "a": 1 })).await.unwrap();

        let mut header = [0u8; 8];
        server.read_exact(&mut header).await.unwrap();
        assert_eq!(&header[..4], &[1, 0, 0, 0]);
        assert_eq!(u32::from_le_bytes(header[4..].try_into().unwrap()), 7);

        let mut body = [0u8; 7];
        server.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn oversized_frames_are_refused() {
        let (mut client, mut server) = duplex(64);
        let mut header = Vec::new();
        header.extend_from_slice(&OP_FRAME.to_le_bytes());
        header.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        server.write_all(&header).await.unwrap();

        assert!(read_frame(&mut client).await.is_err());
    }

    #[tokio::test]
    async fn handshake_waits_for_ready() {
        let (mut client, mut server) = duplex(4096);

        let discord = tokio::spawn(async move {
            let (opcode, hello) = read_frame(&mut server).await.unwrap();
            assert_eq!(opcode, OP_HANDSHAKE);
            assert_eq!(hello["client_id"], "1234");
            write_frame(&mut server, OP_FRAME, &json!({ "cmd": "DISPATCH", "evt": "READY" }))
                .await
                .unwrap();
        });

        handshake(&mut client, "1234").await.unwrap();
        discord.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_reports_close() {
        let (mut client, mut server) = duplex(4096);

        tokio::spawn(async move {
            let _ = read_frame(&mut server).await;
            let _ = write_frame(&mut server, OP_CLOSE, &json!({ "code": 4000, "message": "Invalid Client ID" })).await;
        });

        let err = handshake(&mut client, "bad").await.unwrap_err();
        assert!(err.to_string().contains("Invalid Client ID"));
    }

    #[test]
    fn error_events_fail_requests() {
        let payload = json!({ "evt": "ERROR", "data": { "code": 4000, "message": "child \"activity\" fails" } });
        assert!(check_response(OP_FRAME, &payload).is_err());
        assert!(check_response(OP_FRAME, &json!({ "evt": null, "cmd": "SET_ACTIVITY" })).is_ok());
    }

    #[test]
    fn activity_carries_assets_and_millisecond_timestamps() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let presence = Presence {
            start: Some(start),
            end: Some(start + chrono::TimeDelta::seconds(200)),
            ..Presence::stopped("big_sur_logo")
        };

        let value = activity(&presence);
        assert_eq!(value["type"], 2);
        assert_eq!(value["details"], "Stopped");
        assert_eq!(value["assets"]["large_image"], "big_sur_logo");
        assert_eq!(value["assets"]["small_image"], "stop");
        assert_eq!(value["timestamps"]["start"], 1_700_000_000_000i64);
        assert_eq!(value["timestamps"]["end"], 1_700_000_200_000i64);
    }

    #[test]
    fn stopped_activity_has_no_timestamps_and_long_text_is_cut() {
        let presence = Presence {
            details: "x".repeat(300),
            ..Presence::stopped("logo")
        };
        let value = activity(&presence);
        assert!(value.get("timestamps").is_none());
        assert_eq!(value["details"].as_str().unwrap().chars().count(), MAX_TEXT_LEN);
    }

    #[test]
    fn clearing_sends_null_activity() {
        let command = set_activity_command(None);
        assert_eq!(command["cmd"], "SET_ACTIVITY");
        assert!(command["args"]["activity"].is_null());
        assert!(command["nonce"].as_str().is_some());
    }
}
