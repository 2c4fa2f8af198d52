//! Network transport to the camera.
//!
//! Everything runs over one TCP connection per negotiation pass:
//!
//! - **RTSP signaling** ([`tcp`]): requests from us, responses (and the odd
//!   request) from the camera.
//! - **Media** ([`interleaved`]): RTP and RTCP multiplexed onto the same
//!   connection with `$` framing (RFC 2326 §10.12). Media `i` uses channels
//!   `2i` (RTP) and `2i + 1` (RTCP).
//!
//! UDP transport is never offered. Interleaving avoids reordering across
//! sockets and NAT traversal entirely.

pub mod interleaved;
pub mod tcp;

pub use interleaved::Frame;
pub use tcp::{Channels, RequestWriter, RtspConnection};

/// Channel pair for the media at position `slot` in SETUP order.
pub fn channels_for(slot: usize) -> tcp::Channels {
    let rtp = (slot * 2).min(usize::from(u8::MAX - 1)) as u8;
    tcp::Channels { rtp, rtcp: rtp + 1 }
}
