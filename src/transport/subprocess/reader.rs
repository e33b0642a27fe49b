//! Message reading logic for the stdio transport

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;

use crate::error::{CoreError, Result};

use super::transport::StdioTransport;

impl StdioTransport {
    /// Spawn a background task that decodes one JSON document per stdout line
    ///
    /// A line longer than the configured maximum is reported as an error and
    /// skipped up to its newline; reading continues with the next line.
    pub(super) fn read_messages_impl(
        &mut self,
    ) -> mpsc::UnboundedReceiver<Result<serde_json::Value>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let Some(stdout) = self.stdout.take() else {
            let _ = tx.send(Err(CoreError::connection(
                "Not connected - stdout not available",
            )));
            return rx;
        };

        let name = self.name.clone();
        let max_buffer_size = self.max_buffer_size;

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = Vec::new();
            let mut discarding = false;

            loop {
                line.clear();
                let limit = max_buffer_size as u64 + 1;
                match (&mut reader).take(limit).read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let complete = line.last() == Some(&b'\n');
                        if discarding {
                            discarding = !complete;
                            continue;
                        }
                        if !complete && line.len() > max_buffer_size {
                            let _ = tx.send(Err(CoreError::json_decode(format!(
                                "JSON message exceeded maximum buffer size of {max_buffer_size} bytes"
                            ))));
                            discarding = true;
                            continue;
                        }

                        let text = line.trim_ascii();
                        if text.is_empty() {
                            continue;
                        }
                        match serde_json::from_slice::<serde_json::Value>(text) {
                            Ok(value) => {
                                if tx.send(Ok(value)).is_err() {
                                    // Receiver dropped, stop reading
                                    break;
                                }
                            }
                            Err(e) => {
                                log::warn!("[{name}] Skipping non-JSON output line: {e}");
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(CoreError::Io(e)));
                        break;
                    }
                }
            }

            log::debug!("[{name}] Server output closed");
        });

        self.reader_task = Some(task);
        rx
    }
}
