//! SMTP/LMTP/Submission reception (spec §4.1): wire protocol, Sieve-backed
//! injection, and the ambient modules (normalization, message-copy sink,
//! outbound handoff, URLAUTH) a session needs along the way.

pub mod commands;
pub mod copy_sink;
pub mod core;
pub mod injection;
pub mod normalize;
pub mod pipeline;
pub mod response;
pub mod spool;
pub mod urlauth;

pub use crate::core::{Dialect, ServerCore, Session, SessionData};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::commands::Outcome;
use crate::core::InputMode;
use crate::response::ReplyBatch;

/// Greets the client with the dialect-appropriate banner (spec §4.1).
fn greeting(session: &Session<impl AsyncRead + AsyncWrite + Unpin>) -> ReplyBatch {
    ReplyBatch::single(response::Reply::new(
        220,
        "",
        format!(
            "{} {} service ready",
            session.core.config.hostname,
            session.data.dialect.greeting_protocol()
        ),
    ))
}

async fn write_reply<T>(session: &mut Session<T>, batch: &ReplyBatch) -> std::io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    session
        .stream
        .write_all(batch.render().as_bytes())
        .await?;
    session.stream.flush().await
}

/// Drives one accepted connection from greeting to `QUIT`/EOF. Every
/// dialect (SMTP, LMTP, Submit) runs through the same loop; `Session::new`'s
/// `Dialect` parameter is what varies the capability set and command
/// legality (spec §4.1).
pub async fn run_session<T>(mut session: Session<T>) -> std::io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let greet = greeting(&session);
    write_reply(&mut session, &greet).await?;

    let mut line = String::new();
    loop {
        match session.mode {
            InputMode::Command => {
                line.clear();
                let n = session.stream.read_line(&mut line).await?;
                if n == 0 {
                    info!("connection closed by peer");
                    return Ok(());
                }

                let ticket = session.pipeline.ticket();
                let outcome = commands::dispatch(&mut session, &line).await;
                // Real overlap between commands is not implemented (this
                // loop is strictly sequential); the ticket still marks
                // this command's turn so the gate's contract holds.
                session.pipeline.wait_turn(ticket).await;

                match outcome {
                    Outcome::Reply(batch) => {
                        write_reply(&mut session, &batch).await?;
                    }
                    Outcome::EnterData(batch) => {
                        write_reply(&mut session, &batch).await?;
                    }
                    Outcome::EnterChunk { .. } => {}
                    Outcome::EnterSasl(batch) => {
                        write_reply(&mut session, &batch).await?;
                    }
                    Outcome::Quit(batch) => {
                        write_reply(&mut session, &batch).await?;
                        session.pipeline.finish(ticket);
                        return Ok(());
                    }
                }
                session.pipeline.finish(ticket);
            }
            InputMode::Data => {
                loop {
                    line.clear();
                    let n = session.stream.read_line(&mut line).await?;
                    if n == 0 {
                        warn!("connection closed mid-DATA");
                        return Ok(());
                    }
                    if line.len() > 998 {
                        let batch = ReplyBatch::single(response::Reply::from_error(
                            &common::error::MailError::OversizeLine,
                            false,
                        ));
                        write_reply(&mut session, &batch).await?;
                        return Ok(());
                    }
                    let raw_line = line.trim_end_matches(['\r', '\n']).as_bytes().to_vec();
                    let terminated = commands::unstuff_dot(&mut session.data.body, &raw_line);
                    if terminated {
                        break;
                    }
                }
                let outcome = commands::finalize_transaction(&mut session).await;
                if let Outcome::Reply(batch) = outcome {
                    write_reply(&mut session, &batch).await?;
                }
            }
            InputMode::Chunk => {
                let mut buf = vec![0u8; session.chunk_remaining];
                session.stream.read_exact(&mut buf).await?;
                session.data.body.extend_from_slice(&buf);
                session.mode = InputMode::Command;
                let last = session.chunk_last;
                if last {
                    let outcome = commands::finalize_transaction(&mut session).await;
                    if let Outcome::Reply(batch) = outcome {
                        write_reply(&mut session, &batch).await?;
                    }
                } else {
                    let batch = ReplyBatch::single(response::Reply::new(
                        250,
                        "2.0.0",
                        format!("{} octets received", buf.len()),
                    ));
                    write_reply(&mut session, &batch).await?;
                }
            }
            InputMode::Sasl => {
                line.clear();
                let n = session.stream.read_line(&mut line).await?;
                if n == 0 {
                    return Ok(());
                }
                let outcome = commands::finish_sasl_plain(&mut session, &line).await;
                if let Outcome::Reply(batch) = outcome {
                    write_reply(&mut session, &batch).await?;
                }
            }
        }
    }
}
