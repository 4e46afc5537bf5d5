use super::{CheckpointHandle, PartitionSource, TransportError, TransportMessage};
use crate::config::types::{PartitionConfig, ReadStart};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;

/// One line of a partition log file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    sequence_number: Option<u64>,
    #[serde(default)]
    properties: HashMap<String, String>,
    #[serde(default)]
    body: Value,
}

/// Partition backed by a JSON-lines file.
///
/// Each line is an envelope carrying message properties and a body. The
/// checkpoint offset of a message is the byte position right after its line,
/// so a restart resumes with the first unhandled line.
pub struct FilePartitionSource {
    partition_id: String,
    path: PathBuf,
    start: ReadStart,
    follow: bool,
    poll_interval: Duration,

    // Internal state
    file: Option<BufReader<File>>,
    resume: Option<CheckpointHandle>,
    current_offset: u64,
    next_sequence: u64,
}

impl FilePartitionSource {
    pub fn new(config: &PartitionConfig) -> Self {
        Self {
            partition_id: config.id.clone(),
            path: config.path.clone(),
            start: config.start,
            follow: config.follow,
            poll_interval: config.poll_interval,
            file: None,
            resume: None,
            current_offset: 0,
            next_sequence: 0,
        }
    }

    /// Resume right after a previously persisted checkpoint
    pub fn resume_from(mut self, checkpoint: Option<CheckpointHandle>) -> Self {
        self.resume = checkpoint;
        self
    }

    /// Byte position of the next unread line
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Open the log and position the reader.
    ///
    /// Returns the checkpoint reading resumes after, or `None` when reading
    /// starts from the configured position. A checkpoint beyond the end of the
    /// file (rotated or truncated log) is discarded: reading restarts at the
    /// beginning and sequence numbers continue after the discarded handle.
    pub fn open(&mut self) -> Result<Option<CheckpointHandle>, TransportError> {
        let file = File::open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TransportError::Unavailable(format!(
                "{} ({} does not exist)",
                self.partition_id,
                self.path.display()
            )),
            _ => TransportError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open partition log '{}': {}", self.path.display(), e),
            )),
        })?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let effective = match &self.resume {
            Some(handle) if handle.offset <= len => {
                reader.seek(SeekFrom::Start(handle.offset))?;
                self.current_offset = handle.offset;
                self.next_sequence = handle.sequence_number + 1;
                tracing::info!(
                    partition_id = %self.partition_id,
                    checkpoint = %handle,
                    "Resuming partition from checkpoint"
                );
                Some(handle.clone())
            }
            Some(handle) => {
                tracing::warn!(
                    partition_id = %self.partition_id,
                    checkpoint = %handle,
                    file_len = len,
                    "Checkpoint lies beyond end of partition log, reading from beginning"
                );
                reader.seek(SeekFrom::Start(0))?;
                self.current_offset = 0;
                self.next_sequence = handle.sequence_number + 1;
                None
            }
            None => {
                match self.start {
                    ReadStart::Beginning => {
                        reader.seek(SeekFrom::Start(0))?;
                        self.current_offset = 0;
                    }
                    ReadStart::End => {
                        self.current_offset = reader.seek(SeekFrom::End(0))?;
                    }
                }
                None
            }
        };

        self.file = Some(reader);
        Ok(effective)
    }

    /// Read the next envelope, `None` at end of file
    fn read_message(&mut self) -> Result<Option<TransportMessage>, TransportError> {
        loop {
            let Some(file) = self.file.as_mut() else {
                return Ok(None);
            };

            let mut raw = Vec::new();
            let bytes_read = match file.read_until(b'\n', &mut raw) {
                Ok(bytes_read) => bytes_read,
                Err(e) => {
                    // Retry the whole line on the next read
                    file.seek(SeekFrom::Start(self.current_offset))?;
                    return Err(e.into());
                }
            };
            if bytes_read == 0 {
                return Ok(None);
            }

            // A writer may still be appending this line
            if self.follow && raw.last() != Some(&b'\n') {
                file.seek(SeekFrom::Start(self.current_offset))?;
                return Ok(None);
            }

            let line_start = self.current_offset;
            self.current_offset += bytes_read as u64;

            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line.trim(),
                Err(e) => {
                    tracing::warn!(
                        partition_id = %self.partition_id,
                        offset = line_start,
                        error = %e,
                        "Skipping non UTF-8 line in partition log"
                    );
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            let envelope: Envelope = match serde_json::from_str(line) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(
                        partition_id = %self.partition_id,
                        offset = line_start,
                        error = %e,
                        "Skipping malformed envelope in partition log"
                    );
                    continue;
                }
            };

            let sequence_number = envelope.sequence_number.unwrap_or(self.next_sequence);
            self.next_sequence = sequence_number + 1;

            let body = match envelope.body {
                Value::Null => Vec::new(),
                Value::String(raw) => raw.into_bytes(),
                other => serde_json::to_vec(&other).unwrap_or_default(),
            };

            return Ok(Some(TransportMessage {
                properties: envelope.properties,
                body,
                handle: CheckpointHandle {
                    partition_id: self.partition_id.clone(),
                    sequence_number,
                    offset: self.current_offset,
                },
            }));
        }
    }
}

#[async_trait]
impl PartitionSource for FilePartitionSource {
    fn partition_id(&self) -> &str {
        &self.partition_id
    }

    async fn next_delivery(
        &mut self,
        max_messages: usize,
    ) -> Result<Option<Vec<TransportMessage>>, TransportError> {
        if self.file.is_none() {
            self.open()?;
        }

        // An io error mid-delivery still hands over what was read before it
        let mut messages = Vec::new();
        while messages.len() < max_messages.max(1) {
            match self.read_message() {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => break,
                Err(e) if !messages.is_empty() => {
                    tracing::warn!(
                        partition_id = %self.partition_id,
                        error = %e,
                        delivered = messages.len(),
                        "Partition read failed, delivering messages read so far"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if !messages.is_empty() {
            return Ok(Some(messages));
        }

        if self.follow {
            // Nothing buffered, so dropping this future here loses nothing
            sleep(self.poll_interval).await;
            Ok(Some(Vec::new()))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_for(file: &NamedTempFile, follow: bool) -> PartitionConfig {
        PartitionConfig {
            id: "0".to_string(),
            path: file.path().to_path_buf(),
            start: ReadStart::Beginning,
            follow,
            max_batch_size: 100,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn envelope(agent: &str, body: &str) -> String {
        format!(
            r#"{{"properties":{{"content-type":"application/x-discovery-event-v2-json","iothub-connection-device-id":"{}"}},"body":{}}}"#,
            agent, body
        )
    }

    #[tokio::test]
    async fn test_reads_envelopes_with_offsets() {
        let mut file = NamedTempFile::new().unwrap();
        let first = envelope("sup1", r#"{"scanTimestamp":"2026-03-02T08:00:00Z","index":0}"#);
        writeln!(file, "{}", first).unwrap();
        writeln!(file, "{}", envelope("sup2", "null")).unwrap();
        file.flush().unwrap();

        let mut source = FilePartitionSource::new(&config_for(&file, false));
        let delivery = source.next_delivery(10).await.unwrap().unwrap();

        assert_eq!(delivery.len(), 2);
        assert_eq!(delivery[0].property("iothub-connection-device-id"), Some("sup1"));
        assert_eq!(delivery[0].handle.sequence_number, 0);
        assert_eq!(delivery[0].handle.offset, first.len() as u64 + 1);
        assert_eq!(delivery[1].handle.sequence_number, 1);
        assert!(delivery[1].body.is_empty());

        // Exhausted without follow
        assert!(source.next_delivery(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_respects_max_messages() {
        let mut file = NamedTempFile::new().unwrap();
        for _ in 0..5 {
            writeln!(file, "{}", envelope("sup1", "{}")).unwrap();
        }
        file.flush().unwrap();

        let mut source = FilePartitionSource::new(&config_for(&file, false));
        assert_eq!(source.next_delivery(2).await.unwrap().unwrap().len(), 2);
        assert_eq!(source.next_delivery(2).await.unwrap().unwrap().len(), 2);
        assert_eq!(source.next_delivery(2).await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_from_checkpoint() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", envelope("sup1", "{}")).unwrap();
        writeln!(file, "{}", envelope("sup2", "{}")).unwrap();
        writeln!(file, "{}", envelope("sup3", "{}")).unwrap();
        file.flush().unwrap();

        let mut source = FilePartitionSource::new(&config_for(&file, false));
        let delivery = source.next_delivery(1).await.unwrap().unwrap();
        let checkpoint = delivery[0].handle.clone();

        let mut resumed = FilePartitionSource::new(&config_for(&file, false))
            .resume_from(Some(checkpoint));
        let rest = resumed.next_delivery(10).await.unwrap().unwrap();

        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].property("iothub-connection-device-id"), Some("sup2"));
        assert_eq!(rest[0].handle.sequence_number, 1);
    }

    #[tokio::test]
    async fn test_skips_malformed_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not an envelope").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", envelope("sup1", r#""raw text body""#)).unwrap();
        file.flush().unwrap();

        let mut source = FilePartitionSource::new(&config_for(&file, false));
        let delivery = source.next_delivery(10).await.unwrap().unwrap();

        assert_eq!(delivery.len(), 1);
        assert_eq!(delivery[0].body, b"raw text body".to_vec());
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_skipped_without_losing_neighbours() {
        let mut file = NamedTempFile::new().unwrap();
        let first = envelope("sup1", "{}");
        let garbage = b"\xff\xfe garbage\n";
        let last = envelope("sup3", "{}");
        writeln!(file, "{}", first).unwrap();
        file.write_all(garbage).unwrap();
        writeln!(file, "{}", last).unwrap();
        file.flush().unwrap();
        let file_len = (first.len() + 1 + garbage.len() + last.len() + 1) as u64;

        let mut source = FilePartitionSource::new(&config_for(&file, false));
        let delivery = source.next_delivery(10).await.unwrap().unwrap();

        assert_eq!(delivery.len(), 2);
        assert_eq!(delivery[0].property("iothub-connection-device-id"), Some("sup1"));
        assert_eq!(delivery[1].property("iothub-connection-device-id"), Some("sup3"));
        assert_eq!(delivery[1].handle.offset, file_len);
        assert_eq!(source.current_offset(), file_len);
    }

    #[tokio::test]
    async fn test_checkpoint_beyond_end_of_log_is_discarded() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", envelope("sup1", "{}")).unwrap();
        file.flush().unwrap();

        let stale = CheckpointHandle {
            partition_id: "0".to_string(),
            sequence_number: 100,
            offset: 100_000,
        };
        let mut source =
            FilePartitionSource::new(&config_for(&file, false)).resume_from(Some(stale));

        assert_eq!(source.open().unwrap(), None);

        let delivery = source.next_delivery(10).await.unwrap().unwrap();
        assert_eq!(delivery.len(), 1);
        assert_eq!(delivery[0].property("iothub-connection-device-id"), Some("sup1"));
        // Handles keep moving forward past the discarded position
        assert_eq!(delivery[0].handle.sequence_number, 101);
    }

    #[tokio::test]
    async fn test_open_reports_checkpoint_within_log() {
        let mut file = NamedTempFile::new().unwrap();
        let first = envelope("sup1", "{}");
        writeln!(file, "{}", first).unwrap();
        file.flush().unwrap();

        let checkpoint = CheckpointHandle {
            partition_id: "0".to_string(),
            sequence_number: 0,
            offset: first.len() as u64 + 1,
        };
        let mut source = FilePartitionSource::new(&config_for(&file, false))
            .resume_from(Some(checkpoint.clone()));

        assert_eq!(source.open().unwrap(), Some(checkpoint));
        assert!(source.next_delivery(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_follow_waits_for_complete_lines() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", envelope("sup1", "{}")).unwrap();
        file.flush().unwrap();

        let mut source = FilePartitionSource::new(&config_for(&file, true));

        // Partial line is left for the writer to finish
        let delivery = source.next_delivery(10).await.unwrap().unwrap();
        assert!(delivery.is_empty());
        assert_eq!(source.current_offset(), 0);

        writeln!(file).unwrap();
        file.flush().unwrap();

        let delivery = source.next_delivery(10).await.unwrap().unwrap();
        assert_eq!(delivery.len(), 1);
    }

    #[tokio::test]
    async fn test_start_at_end_skips_existing_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", envelope("sup1", "{}")).unwrap();
        file.flush().unwrap();

        let mut config = config_for(&file, true);
        config.start = ReadStart::End;
        let mut source = FilePartitionSource::new(&config);

        assert!(source.next_delivery(10).await.unwrap().unwrap().is_empty());

        writeln!(file, "{}", envelope("sup2", "{}")).unwrap();
        file.flush().unwrap();

        let delivery = source.next_delivery(10).await.unwrap().unwrap();
        assert_eq!(delivery.len(), 1);
        assert_eq!(delivery[0].property("iothub-connection-device-id"), Some("sup2"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let config = PartitionConfig {
            id: "0".to_string(),
            path: PathBuf::from("/nonexistent/partition-0.jsonl"),
            start: ReadStart::Beginning,
            follow: false,
            max_batch_size: 10,
            poll_interval: Duration::from_millis(10),
        };
        let mut source = FilePartitionSource::new(&config);
        assert!(matches!(
            source.next_delivery(10).await,
            Err(TransportError::Unavailable(_))
        ));
    }
}
