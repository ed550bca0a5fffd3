//! Pull-replication byte protocol (spec.md §4.G "Pull replication").
//!
//! This names the protocol-level contract spec.md calls out, not a new
//! wire page format: one TCP connection per pull, framed as tagged,
//! length-prefixed messages. The client sends `GET_CHANGESETS`; the
//! server answers with an optional whole-volume transfer (`DB_HEADER`,
//! repeated `DB_FILENAME`/`DB_FILEDATA`, `DB_FOOTER` — used when the
//! puller is missing whole WAL segments) followed by `CHANGESET` records,
//! terminated by `END_OF_CHANGES` or `FAIL`.

use byteorder::{ByteOrder, LittleEndian};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{DiscoveryError, DiscoveryResult};

const TAG_GET_CHANGESETS: u8 = 0;
const TAG_DB_HEADER: u8 = 1;
const TAG_DB_FILENAME: u8 = 2;
const TAG_DB_FILEDATA: u8 = 3;
const TAG_DB_FOOTER: u8 = 4;
const TAG_CHANGESET: u8 = 5;
const TAG_END_OF_CHANGES: u8 = 6;
const TAG_FAIL: u8 = 7;

/// `GET_CHANGESETS(uuid, from_revision, path)` plus the requester's own
/// mastery level for `path`, so the server can apply the "only pull
/// forward" rule (spec.md §4.G last paragraph).
#[derive(Debug, Clone, PartialEq)]
pub struct GetChangesetsRequest {
    pub uuid: [u8; 16],
    pub from_revision: u64,
    pub path: String,
    pub requester_mastery: i64,
}

impl GetChangesetsRequest {
    pub async fn write(&self, stream: &mut (impl AsyncWriteExt + Unpin)) -> DiscoveryResult<()> {
        let mut body = Vec::with_capacity(16 + 8 + 8 + 4 + self.path.len());
        body.extend_from_slice(&self.uuid);
        push_u64(&mut body, self.from_revision);
        push_i64(&mut body, self.requester_mastery);
        push_varlen_bytes(&mut body, self.path.as_bytes());
        write_frame(stream, TAG_GET_CHANGESETS, &body).await
    }

    pub async fn read(stream: &mut (impl AsyncReadExt + Unpin)) -> DiscoveryResult<Self> {
        let (tag, body) = read_frame(stream).await?;
        expect_tag(tag, TAG_GET_CHANGESETS)?;
        if body.len() < 32 {
            return Err(DiscoveryError::Malformed("truncated GET_CHANGESETS".into()));
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&body[0..16]);
        let from_revision = LittleEndian::read_u64(&body[16..24]);
        let requester_mastery = LittleEndian::read_i64(&body[24..32]);
        let (path_bytes, _) = read_varlen_bytes(&body[32..])?;
        let path = String::from_utf8(path_bytes).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
        Ok(GetChangesetsRequest {
            uuid,
            from_revision,
            path,
            requester_mastery,
        })
    }
}

/// Everything the server streamed back for one pull: an optional
/// whole-volume file transfer, plus the changeset lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullOutcome {
    pub uuid: Option<[u8; 16]>,
    pub revision: Option<u64>,
    pub files: Vec<(String, Vec<u8>)>,
    pub changesets: Vec<(u64, Vec<u8>)>,
}

/// Server side: stream the answer to one `GET_CHANGESETS` request.
///
/// `source_mastery` is this server's mastery level for the path;
/// `files` is `Some(whole volume files)` only when the puller is behind
/// by whole WAL segments (spec.md: "if the target is missing whole
/// segments"); `changesets` are the WAL lines from `from_revision`
/// onward.
pub async fn serve_pull_request(
    stream: &mut (impl AsyncWriteExt + Unpin),
    request: &GetChangesetsRequest,
    source_mastery: i64,
    files: Option<&[(String, Vec<u8>)]>,
    changesets: &[(u64, Vec<u8>)],
) -> DiscoveryResult<()> {
    if source_mastery <= request.requester_mastery {
        write_frame(
            stream,
            TAG_FAIL,
            format!("source mastery {source_mastery} is not higher than requester mastery {}", request.requester_mastery).as_bytes(),
        )
        .await?;
        return Ok(());
    }

    let mut header = Vec::with_capacity(24);
    header.extend_from_slice(&request.uuid);
    push_u64(&mut header, request.from_revision);
    write_frame(stream, TAG_DB_HEADER, &header).await?;

    if let Some(files) = files {
        for (name, data) in files {
            write_frame(stream, TAG_DB_FILENAME, name.as_bytes()).await?;
            write_frame(stream, TAG_DB_FILEDATA, data).await?;
        }
        write_frame(stream, TAG_DB_FOOTER, &[]).await?;
    }

    for (revision, line) in changesets {
        let mut body = Vec::with_capacity(8 + line.len());
        push_u64(&mut body, *revision);
        body.extend_from_slice(line);
        write_frame(stream, TAG_CHANGESET, &body).await?;
    }

    write_frame(stream, TAG_END_OF_CHANGES, &[]).await
}

/// Client side: read frames until `END_OF_CHANGES` or `FAIL`.
pub async fn pull_changesets(stream: &mut (impl AsyncReadExt + Unpin)) -> DiscoveryResult<PullOutcome> {
    let mut outcome = PullOutcome::default();
    loop {
        let (tag, body) = read_frame(stream).await?;
        match tag {
            TAG_DB_HEADER => {
                if body.len() < 24 {
                    return Err(DiscoveryError::Malformed("truncated DB_HEADER".into()));
                }
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&body[0..16]);
                outcome.uuid = Some(uuid);
                outcome.revision = Some(LittleEndian::read_u64(&body[16..24]));
            }
            TAG_DB_FILENAME => {
                let name = String::from_utf8(body).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
                outcome.files.push((name, Vec::new()));
            }
            TAG_DB_FILEDATA => {
                let last = outcome
                    .files
                    .last_mut()
                    .ok_or_else(|| DiscoveryError::Malformed("DB_FILEDATA with no preceding DB_FILENAME".into()))?;
                last.1 = body;
            }
            TAG_DB_FOOTER => {}
            TAG_CHANGESET => {
                if body.len() < 8 {
                    return Err(DiscoveryError::Malformed("truncated CHANGESET".into()));
                }
                let revision = LittleEndian::read_u64(&body[0..8]);
                outcome.changesets.push((revision, body[8..].to_vec()));
            }
            TAG_END_OF_CHANGES => return Ok(outcome),
            TAG_FAIL => {
                let reason = String::from_utf8_lossy(&body).into_owned();
                return Err(DiscoveryError::ReplicationFailed(reason));
            }
            other => return Err(DiscoveryError::Malformed(format!("unexpected frame tag {other}"))),
        }
    }
}

fn expect_tag(got: u8, want: u8) -> DiscoveryResult<()> {
    if got != want {
        Err(DiscoveryError::Malformed(format!("expected frame tag {want}, got {got}")))
    } else {
        Ok(())
    }
}

async fn write_frame(stream: &mut (impl AsyncWriteExt + Unpin), tag: u8, body: &[u8]) -> DiscoveryResult<()> {
    let mut header = [0u8; 5];
    header[0] = tag;
    LittleEndian::write_u32(&mut header[1..5], body.len() as u32);
    stream.write_all(&header).await?;
    if !body.is_empty() {
        stream.write_all(body).await?;
    }
    Ok(())
}

async fn read_frame(stream: &mut (impl AsyncReadExt + Unpin)) -> DiscoveryResult<(u8, Vec<u8>)> {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await?;
    let tag = header[0];
    let len = LittleEndian::read_u32(&header[1..5]) as usize;
    let mut body = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut body).await?;
    }
    Ok((tag, body))
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, v);
    out.extend_from_slice(&buf);
}
fn push_i64(out: &mut Vec<u8>, v: i64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_i64(&mut buf, v);
    out.extend_from_slice(&buf);
}
fn push_varlen_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    let mut len_buf = [0u8; 4];
    LittleEndian::write_u32(&mut len_buf, bytes.len() as u32);
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(bytes);
}
fn read_varlen_bytes(bytes: &[u8]) -> DiscoveryResult<(Vec<u8>, usize)> {
    if bytes.len() < 4 {
        return Err(DiscoveryError::Malformed("truncated length prefix".into()));
    }
    let len = LittleEndian::read_u32(&bytes[0..4]) as usize;
    if bytes.len() < 4 + len {
        return Err(DiscoveryError::Malformed("truncated length-prefixed field".into()));
    }
    Ok((bytes[4..4 + len].to_vec(), 4 + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn full_pull_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = GetChangesetsRequest::read(&mut socket).await.unwrap();
            assert_eq!(request.path, "/idx/1");
            serve_pull_request(
                &mut socket,
                &request,
                /* source_mastery */ 5,
                None,
                &[(1, b"line-a".to_vec()), (2, b"line-b".to_vec())],
            )
            .await
            .unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = GetChangesetsRequest {
            uuid: [9u8; 16],
            from_revision: 1,
            path: "/idx/1".into(),
            requester_mastery: 1,
        };
        request.write(&mut client).await.unwrap();
        let outcome = pull_changesets(&mut client).await.unwrap();
        assert_eq!(outcome.changesets, vec![(1, b"line-a".to_vec()), (2, b"line-b".to_vec())]);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn mastery_not_higher_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = GetChangesetsRequest::read(&mut socket).await.unwrap();
            serve_pull_request(&mut socket, &request, 1, None, &[]).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = GetChangesetsRequest {
            uuid: [1u8; 16],
            from_revision: 0,
            path: "/idx/1".into(),
            requester_mastery: 5,
        };
        request.write(&mut client).await.unwrap();
        let err = pull_changesets(&mut client).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::ReplicationFailed(_)));
        server.await.unwrap();
    }
}
