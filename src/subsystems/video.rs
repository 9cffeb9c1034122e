//! # Video stream reassembly
//!
//! The drone fragments each H.264 frame into UDP datagrams of up to 4 KiB.
//! Every datagram starts with a two-byte header: the frame number (wrapping
//! modulo 256) and a segment byte whose low seven bits are the segment index
//! and whose top bit flags the last segment of the frame.
//!
//! [FrameAssembler] stitches the segments back together, discards frames
//! with lost segments, and gates forwarding on having seen a sequence
//! parameter set: a downstream decoder cannot start without the SPS, and
//! forwarding earlier frames would only produce error-frames.

use tracing::{debug, trace};

/// Upper bound on a video datagram, header included.
pub(crate) const VIDEO_DATAGRAM_SIZE: usize = 4096;

const SEGMENT_INDEX_MASK: u8 = 0x7F;
const LAST_SEGMENT_FLAG: u8 = 0x80;

const NAL_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
const NAL_TYPE_SPS: u8 = 7;

/// How many complete frames may be dropped for want of an SPS before the
/// headers are requested again. Heuristic, matched to the drone's keyframe
/// cadence.
const FRAMES_BETWEEN_SPS_REQUESTS: u8 = 8;

/// Outcome of feeding one datagram to the assembler
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameEvent {
    /// Nothing to do yet: mid-frame, or the frame was discarded
    Incomplete,
    /// A full frame, ready to forward downstream
    Frame(Vec<u8>),
    /// A full frame was dropped because no SPS has been seen yet
    AwaitingSps,
    /// As above, and the SPS/PPS headers should be requested again
    RequestSps,
}

/// Reassembles fragmented H.264 frames from video datagrams
pub(crate) struct FrameAssembler {
    current_frame: Vec<u8>,
    current_frame_num: u8,
    last_segment_num: i16,
    discard_current_frame: bool,
    received_sps: bool,
    frames_since_sps_request: u8,
}

impl FrameAssembler {
    pub(crate) fn new() -> Self {
        Self {
            current_frame: Vec::new(),
            current_frame_num: 0,
            last_segment_num: -1,
            discard_current_frame: false,
            received_sps: false,
            frames_since_sps_request: 0,
        }
    }

    pub(crate) fn feed(&mut self, datagram: &[u8]) -> FrameEvent {
        if datagram.len() < 2 {
            debug!("video datagram shorter than its segment header");
            return FrameEvent::Incomplete;
        }

        let frame_num = datagram[0];
        let segment_num = datagram[1] & SEGMENT_INDEX_MASK;
        let last_in_frame = datagram[1] & LAST_SEGMENT_FLAG != 0;

        if frame_num != self.current_frame_num {
            trace!(
                expected = self.current_frame_num,
                got = frame_num,
                "lost segments on a frame boundary"
            );
            self.current_frame_num = frame_num;
            // Fix up the segment counter so the gap is not also counted as an
            // intra-frame loss.
            self.last_segment_num = segment_num as i16 - 1;

            if segment_num != 0 {
                // The start of this frame is gone too.
                self.discard_current_frame = true;
            } else {
                self.current_frame.clear();
            }
        }

        if (self.last_segment_num + 1) & SEGMENT_INDEX_MASK as i16 != segment_num as i16 {
            trace!(frame = self.current_frame_num, "lost segments mid-frame");
            self.discard_current_frame = true;
        }
        self.last_segment_num = segment_num as i16;

        if !self.discard_current_frame {
            self.current_frame.extend_from_slice(&datagram[2..]);
        }

        if !last_in_frame {
            return FrameEvent::Incomplete;
        }

        let event = if self.discard_current_frame {
            FrameEvent::Incomplete
        } else {
            if self.current_frame.len() > NAL_START_CODE.len()
                && self.current_frame.starts_with(&NAL_START_CODE)
                && self.current_frame[4] & 0x1F == NAL_TYPE_SPS
            {
                trace!("received sequence parameter set");
                self.received_sps = true;
            }

            if self.received_sps {
                FrameEvent::Frame(std::mem::take(&mut self.current_frame))
            } else if self.frames_since_sps_request == FRAMES_BETWEEN_SPS_REQUESTS {
                // Counts the frame just dropped.
                self.frames_since_sps_request = 1;
                FrameEvent::RequestSps
            } else {
                self.frames_since_sps_request += 1;
                FrameEvent::AwaitingSps
            }
        };

        self.current_frame.clear();
        self.current_frame_num = self.current_frame_num.wrapping_add(1);
        self.last_segment_num = -1;
        self.discard_current_frame = false;

        event
    }
}
