use super::decoder::{MultipartDecoder, PartEvent};
use super::reassembler::{FrameReassembler, ReassemblyStats};
use crate::error::{OscError, Result};
use crate::frame::Frame;
use crate::transport::PreviewBody;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of one fully consumed preview body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames_emitted: u64,
    pub frames_dropped: u64,
    pub bytes_received: u64,
}

impl From<ReassemblyStats> for StreamSummary {
    fn from(stats: ReassemblyStats) -> Self {
        Self {
            frames_emitted: stats.frames_emitted,
            frames_dropped: stats.frames_dropped,
            bytes_received: stats.bytes_received,
        }
    }
}

/// Pump a live preview body through the multipart decoder and the frame
/// reassembler, handing every completed frame to `on_frame` in arrival order.
///
/// Cancellation is observed while waiting for the transport and before each
/// frame is delivered, never in the middle of a frame. Decode glitches end the
/// body with [`OscError::Multipart`]; frames completed before the glitch have
/// already been delivered.
pub async fn reassemble_frames<F>(
    body: PreviewBody,
    max_frame_bytes: usize,
    cancel: &CancellationToken,
    mut on_frame: F,
) -> Result<StreamSummary>
where
    F: FnMut(Frame),
{
    let mut decoder = MultipartDecoder::from_content_type(body.content_type.as_deref());
    let mut reassembler = FrameReassembler::new(max_frame_bytes);
    let mut chunks = body.chunks;

    debug!(
        "Consuming live preview body (content-type: {:?})",
        body.content_type
    );

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OscError::Cancelled),
            next = chunks.next() => next,
        };

        let Some(chunk) = next else {
            if let Some(rest) = decoder.flush() {
                if let Some(frame) = reassembler.push_chunk(&rest) {
                    deliver(frame, cancel, &mut on_frame)?;
                }
            }
            if let Err(e) = decoder.finish() {
                // The last part's payload arrived in full, only its delimiter is missing
                if !reassembler.part_complete() {
                    return Err(e.into());
                }
                debug!("Live preview body ended without a delimiter after its last part");
            }

            let summary = StreamSummary::from(reassembler.stats());
            info!(
                "Live preview body finished: {} frames, {} dropped, {:.1} KB",
                summary.frames_emitted,
                summary.frames_dropped,
                summary.bytes_received as f64 / 1024.0
            );
            return Ok(summary);
        };

        decoder.feed(&chunk?);
        while let Some(event) = decoder.next_event()? {
            match event {
                PartEvent::Headers(headers) => reassembler.begin_part(&headers),
                PartEvent::Data(data) => {
                    if let Some(frame) = reassembler.push_chunk(&data) {
                        deliver(frame, cancel, &mut on_frame)?;
                    }
                }
                PartEvent::End => reassembler.end_part(),
            }
        }
    }
}

fn deliver<F: FnMut(Frame)>(
    frame: Frame,
    cancel: &CancellationToken,
    on_frame: &mut F,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(OscError::Cancelled);
    }
    on_frame(frame);
    Ok(())
}
