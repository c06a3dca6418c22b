//! # RN2903 Line Transport
//!
//! CRLF-framed byte transport for the modem: a serial-port opener fixed at
//! 57600 8N1 without flow control, a line-splitting reader task, and a
//! command writer. The reader and writer are generic over the stream so
//! tests drive the modem over an in-memory duplex pipe instead of a port.

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::LinkError;

/// Modem line speed per the RN2903 datasheet.
pub const BAUD_RATE: u32 = 57_600;

/// What the reader task produces.
#[derive(Debug)]
pub enum ReaderEvent {
    /// One complete line, CRLF stripped. Empty lines are not reported.
    Line(String),
    /// The port reached EOF or failed; no further lines will arrive.
    Closed,
}

/// Open the serial port at 57600 8N1, no flow control.
pub async fn open(port_name: &str) -> Result<SerialStream, LinkError> {
    tokio_serial::new(port_name, BAUD_RATE)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|e| LinkError::io("serial open", e))
}

/// Spawn the reader task. It owns the read half for its lifetime, splits
/// the byte stream on line endings and forwards each non-empty line. The
/// task exits when the stream ends or the receiver is dropped.
pub fn spawn_reader<R>(rd: R) -> mpsc::UnboundedReceiver<ReaderEvent>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut reader = BufReader::new(rd);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    let _ = tx.send(ReaderEvent::Closed);
                    break;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if line.is_empty() {
                        continue;
                    }
                    debug!("modem <- {line:?}");
                    if tx.send(ReaderEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("modem read error: {e}");
                    let _ = tx.send(ReaderEvent::Closed);
                    break;
                }
            }
        }
    });
    rx
}

/// Write one command, terminated with CRLF, and flush.
pub async fn write_line<W>(wr: &mut W, command: &str) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    debug!("modem -> {command:?}");
    wr.write_all(command.as_bytes())
        .await
        .map_err(|e| LinkError::io("serial write", e))?;
    wr.write_all(b"\r\n")
        .await
        .map_err(|e| LinkError::io("serial write", e))?;
    wr.flush().await.map_err(|e| LinkError::io("serial flush", e))
}

/// Write the wake-up preamble: flush, three bare CRLFs, flush.
pub async fn write_wakeup<W>(wr: &mut W) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    wr.flush().await.map_err(|e| LinkError::io("serial flush", e))?;
    wr.write_all(b"\r\n\r\n\r\n")
        .await
        .map_err(|e| LinkError::io("serial write", e))?;
    wr.flush().await.map_err(|e| LinkError::io("serial flush", e))
}
