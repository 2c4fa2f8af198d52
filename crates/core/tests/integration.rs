//! Integration tests against a scripted camera on a local socket.
//!
//! The camera speaks just enough RTSP for OPTIONS → DESCRIBE → SETUP → PLAY
//! and then pushes interleaved RTP, mirroring what a real IP camera does
//! with `Transport: RTP/AVP/TCP;interleaved=...`.

use std::io::{BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use capture::protocol::{RtspRequest, RtspResponse};
use capture::transport::interleaved::{Frame, read_frame, write_frame};
use capture::{
    BackChannelWriter, BoundedQueue, CaptureConfig, CaptureError, Codec, Packet, Session,
    SessionState, SinkTargets, WriteOutcome,
};

/// Baseline H.264 SPS for 640x480, no VUI.
const SPS_B64: &str = "Z0IAHtoCgPZA";
const PPS_B64: &str = "aM48gA==";

fn h264_media() -> String {
    format!(
        "m=video 0 RTP/AVP 96\r\n\
         a=rtpmap:96 H264/90000\r\n\
         a=fmtp:96 packetization-mode=1;profile-level-id=42001e;sprop-parameter-sets={SPS_B64},{PPS_B64}\r\n\
         a=control:trackID=1\r\n"
    )
}

const PCMU_MEDIA: &str = "m=audio 0 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\na=control:trackID=2\r\n";
const BACKCHANNEL_MEDIA: &str =
    "m=audio 0 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\na=sendonly\r\na=control:trackID=3\r\n";

fn sdp(medias: &[&str]) -> String {
    let mut sdp = String::from("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=Test Camera\r\nt=0 0\r\na=control:*\r\n");
    for m in medias {
        sdp.push_str(m);
    }
    sdp
}

fn rtp(seq: u16, ts: u32, marker: bool, pt: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x80, (u8::from(marker) << 7) | pt];
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(&ts.to_be_bytes());
    packet.extend_from_slice(&0x1122_3344u32.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Credentials the camera demands from DESCRIBE on.
#[derive(Clone)]
enum Auth {
    /// Exact `Authorization` value; only Basic is challenged.
    Basic(&'static str),
    /// Digest and Basic are both challenged; only Digest for this user is
    /// accepted, with the `uri` of the request it is attached to.
    Digest { username: &'static str },
}

const DIGEST_CHALLENGE: &str = "Digest realm=\"cam\", nonce=\"0a4f113b\", qop=\"auth\"";

impl Auth {
    fn accepts(&self, request: &RtspRequest) -> bool {
        let Some(value) = request.get_header("Authorization") else {
            return false;
        };
        match self {
            Auth::Basic(expected) => value == *expected,
            Auth::Digest { username } => {
                value.starts_with("Digest ")
                    && value.contains(&format!("username=\"{username}\""))
                    && value.contains("nonce=\"0a4f113b\"")
                    && value.contains(&format!("uri=\"{}\"", request.uri))
                    && value.contains("response=\"")
            }
        }
    }

    fn challenge(&self, response: RtspResponse) -> RtspResponse {
        match self {
            Auth::Basic(_) => response.add_header("WWW-Authenticate", "Basic realm=\"cam\""),
            Auth::Digest { .. } => response
                .add_header("WWW-Authenticate", DIGEST_CHALLENGE)
                .add_header("WWW-Authenticate", "Basic realm=\"cam\""),
        }
    }
}

/// What the scripted camera does.
#[derive(Clone, Default)]
struct Script {
    sdp: String,
    authorization: Option<Auth>,
    /// SETUP URLs ending with one of these are refused with 461.
    refuse_setup: Vec<&'static str>,
    /// Interleaved frames sent right after the PLAY response.
    after_play: Vec<(u8, Vec<u8>)>,
}

/// What the camera saw.
#[derive(Debug, Default)]
struct CameraLog {
    methods: Vec<String>,
    setup_urls: Vec<String>,
    data: Vec<(u8, Bytes)>,
    unauthorized_sent: usize,
}

fn spawn_camera(script: Script) -> (String, JoinHandle<CameraLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        serve(stream, script)
    });
    (format!("127.0.0.1:{port}"), handle)
}

fn serve(stream: TcpStream, script: Script) -> CameraLog {
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    let mut log = CameraLog::default();
    let mut channel = 0u8;

    loop {
        let request = match read_frame(&mut reader) {
            Ok(Frame::Request(request)) => request,
            Ok(Frame::Data { channel, payload }) => {
                log.data.push((channel, payload));
                continue;
            }
            Ok(Frame::Response(_)) => continue,
            Err(_) => break,
        };
        log.methods.push(request.method.clone());
        let cseq = request.cseq().unwrap_or("0").to_string();

        if request.method != "OPTIONS"
            && let Some(auth) = &script.authorization
            && !auth.accepts(&request)
        {
            log.unauthorized_sent += 1;
            let unauthorized = RtspResponse::new(401, "Unauthorized").add_header("CSeq", &cseq);
            let response = auth.challenge(unauthorized);
            writer.write_all(response.serialize().as_bytes()).unwrap();
            continue;
        }

        let response = respond(&request, &script, &mut log, &mut channel, &cseq);
        writer.write_all(response.serialize().as_bytes()).unwrap();

        if request.method == "PLAY" {
            for (ch, frame) in &script.after_play {
                write_frame(&mut writer, *ch, frame).unwrap();
            }
        }
        if request.method == "TEARDOWN" {
            break;
        }
    }
    log
}

fn respond(
    request: &RtspRequest,
    script: &Script,
    log: &mut CameraLog,
    next_channel: &mut u8,
    cseq: &str,
) -> RtspResponse {
    let ok = RtspResponse::ok().add_header("CSeq", cseq);
    match request.method.as_str() {
        "OPTIONS" => ok.add_header(
            "Public",
            "OPTIONS, DESCRIBE, SETUP, PLAY, GET_PARAMETER, TEARDOWN",
        ),
        "DESCRIBE" => ok
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &format!("{}/", request.uri))
            .with_body(script.sdp.clone()),
        "SETUP" => {
            log.setup_urls.push(request.uri.clone());
            if script.refuse_setup.iter().any(|s| request.uri.ends_with(s)) {
                return RtspResponse::new(461, "Unsupported Transport").add_header("CSeq", cseq);
            }
            let transport = request.get_header("Transport").unwrap_or_default();
            assert!(transport.contains("RTP/AVP/TCP"), "{transport}");
            let granted = format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{}",
                *next_channel,
                *next_channel + 1
            );
            *next_channel += 2;
            ok.add_header("Session", "A1B2C3;timeout=60")
                .add_header("Transport", &granted)
        }
        _ => ok,
    }
}

fn config(addr: &str, credentials: &str) -> CaptureConfig {
    CaptureConfig {
        settle_delay: Duration::ZERO,
        io_timeout: Duration::from_secs(5),
        keepalive: false,
        ..CaptureConfig::new(&format!("rtsp://{credentials}{addr}/live"))
    }
}

fn recv_n(rx: &crossbeam_channel::Receiver<Packet>, n: usize) -> Vec<Packet> {
    (0..n)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).expect("packet"))
        .collect()
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn capture_h264_and_pcmu_with_basic_auth() {
    let idr_fragments = vec![
        (0, rtp(100, 9000, false, 96, &[0x7C, 0x85, 0x88, 0x80])),
        (0, rtp(101, 9000, false, 96, &[0x7C, 0x05, 0x11, 0x22])),
        (0, rtp(102, 9000, true, 96, &[0x7C, 0x45, 0x33])),
    ];
    let mut after_play = idr_fragments.clone();
    after_play.push((1, vec![0x81, 0xC9, 0x00, 0x01, 0, 0, 0, 0]));
    after_play.push((2, rtp(7, 160, false, 0, &[0xFF; 160])));

    let (addr, camera) = spawn_camera(Script {
        sdp: sdp(&[&h264_media(), PCMU_MEDIA]),
        authorization: Some(Auth::Basic("Basic dXNlcjpwYXNz")),
        after_play,
        ..Script::default()
    });

    let mut session = Session::connect(&config(&addr, "user:pass@")).unwrap();
    assert_eq!(session.state(), SessionState::Ready);

    let streams = session.streams();
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[0].index, 0);
    assert_eq!(streams[0].codec, Codec::H264);
    assert!(streams[0].is_video);
    assert_eq!((streams[0].width, streams[0].height), (640, 480));
    assert_eq!(streams[1].index, 1);
    assert_eq!(streams[1].codec.name(), "PCM_MULAW");
    assert!(streams[1].is_audio);
    assert_eq!(session.video_streams().len(), 1);
    assert_eq!(session.audio_streams().len(), 1);

    let queue = Arc::new(BoundedQueue::new(16));
    let rx = queue.receiver();
    let targets = SinkTargets::new(queue);
    session.start(targets.clone()).unwrap();
    assert_eq!(session.state(), SessionState::Playing);

    let mut packets = recv_n(&rx, 2);
    packets.sort_by_key(|p| p.stream_index);

    let video = &packets[0];
    assert_eq!(video.stream_index, 0);
    assert!(video.is_key_frame);
    assert_eq!(&video.data[..5], &[0, 0, 0, 1, 0x09]);
    assert!(video.data.ends_with(&[0, 0, 0, 1, 0x65, 0x88, 0x80, 0x11, 0x22, 0x33]));
    assert_eq!(&video.raw_frame[..], &idr_fragments[2].1[..]);

    let audio = &packets[1];
    assert_eq!(audio.stream_index, 1);
    assert_eq!(audio.codec, Codec::PcmMulaw);
    assert!(!audio.is_key_frame);
    assert_eq!(&audio.data[..], &[0xFF; 160][..]);

    wait_until("liveness", || targets.liveness.counter() == 1);
    assert!(targets.liveness.last_activity() > 0);

    session.close();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.start(SinkTargets::new(Arc::new(BoundedQueue::new(1)))).is_err());

    let log = camera.join().unwrap();
    assert_eq!(
        log.methods,
        ["OPTIONS", "DESCRIBE", "DESCRIBE", "SETUP", "SETUP", "PLAY", "TEARDOWN"]
    );
    assert_eq!(log.unauthorized_sent, 1);
    assert!(log.setup_urls[0].ends_with("/live/trackID=1"));
    assert!(!log.setup_urls[0].contains("pass"));
}

#[test]
fn digest_challenge_is_answered_per_request() {
    let (addr, camera) = spawn_camera(Script {
        sdp: sdp(&[&h264_media()]),
        authorization: Some(Auth::Digest { username: "user" }),
        ..Script::default()
    });

    let mut session = Session::connect(&config(&addr, "user:pass@")).unwrap();
    assert_eq!(session.streams().len(), 1);
    assert_eq!(session.state(), SessionState::Ready);
    session.close();

    let log = camera.join().unwrap();
    // Only the first DESCRIBE is challenged: SETUP carries a fresh digest
    // for its own URI.
    assert_eq!(log.unauthorized_sent, 1);
    assert_eq!(log.methods[..4], ["OPTIONS", "DESCRIBE", "DESCRIBE", "SETUP"]);
    assert_eq!(log.setup_urls.len(), 1);
}

#[test]
fn refused_audio_setup_keeps_video() {
    let (addr, camera) = spawn_camera(Script {
        sdp: sdp(&[&h264_media(), PCMU_MEDIA]),
        refuse_setup: vec!["trackID=2"],
        ..Script::default()
    });

    let mut session = Session::connect(&config(&addr, "")).unwrap();
    assert_eq!(session.streams().len(), 1);
    assert_eq!(session.streams()[0].codec, Codec::H264);
    assert!(session.audio_streams().is_empty());
    session.close();

    let log = camera.join().unwrap();
    assert_eq!(log.setup_urls.len(), 2);
}

#[test]
fn camera_without_usable_media() {
    let (addr, camera) = spawn_camera(Script {
        sdp: sdp(&["m=video 0 RTP/AVP 26\r\na=rtpmap:26 JPEG/90000\r\n"]),
        ..Script::default()
    });
    assert!(matches!(
        Session::connect(&config(&addr, "")),
        Err(CaptureError::NoMedia)
    ));
    camera.join().unwrap();
}

#[test]
fn rejected_credentials() {
    let (addr, camera) = spawn_camera(Script {
        sdp: sdp(&[&h264_media()]),
        authorization: Some(Auth::Basic("Basic dXNlcjpwYXNz")),
        ..Script::default()
    });
    assert!(matches!(
        Session::connect(&config(&addr, "user:wrong@")),
        Err(CaptureError::Unauthorized(_))
    ));
    let log = camera.join().unwrap();
    assert_eq!(log.unauthorized_sent, 2);
}

#[test]
fn back_channel_absent_is_a_noop() {
    let (addr, camera) = spawn_camera(Script {
        sdp: sdp(&[&h264_media(), PCMU_MEDIA]),
        ..Script::default()
    });

    let mut writer = BackChannelWriter::connect(&config(&addr, "")).unwrap();
    assert!(!writer.has_back_channel());
    writer.start().unwrap();

    let packet = Packet {
        stream_index: 1,
        codec: Codec::PcmMulaw,
        is_key_frame: false,
        data: Bytes::from_static(&[0xFF; 4]),
        pts: Duration::ZERO,
        dts: Duration::ZERO,
        raw_frame: Bytes::from(rtp(1, 0, false, 0, &[0xFF; 4])),
    };
    assert_eq!(writer.write_packet(&packet).unwrap(), WriteOutcome::Unsupported);
    assert_eq!(writer.write_samples(&[0xFF; 160]).unwrap(), WriteOutcome::Unsupported);
    writer.close();

    let log = camera.join().unwrap();
    assert_eq!(log.methods, ["OPTIONS", "DESCRIBE"]);
    assert!(log.data.is_empty());
}

#[test]
fn back_channel_replays_frames() {
    let (addr, camera) = spawn_camera(Script {
        sdp: sdp(&[&h264_media(), PCMU_MEDIA, BACKCHANNEL_MEDIA]),
        ..Script::default()
    });

    let mut writer = BackChannelWriter::connect(&config(&addr, "")).unwrap();
    assert!(writer.has_back_channel());
    assert!(writer.stream().unwrap().is_back_channel);
    writer.start().unwrap();

    let raw = rtp(42, 8000, false, 0, &[0x7F; 80]);
    let packet = Packet {
        stream_index: 1,
        codec: Codec::PcmMulaw,
        is_key_frame: false,
        data: Bytes::from_static(&[0x7F; 80]),
        pts: Duration::ZERO,
        dts: Duration::ZERO,
        raw_frame: Bytes::from(raw.clone()),
    };
    assert_eq!(writer.write_packet(&packet).unwrap(), WriteOutcome::Sent);
    assert_eq!(writer.write_samples(&[0xFF; 320]).unwrap(), WriteOutcome::Sent);
    writer.close();

    let log = camera.join().unwrap();
    assert_eq!(log.methods, ["OPTIONS", "DESCRIBE", "SETUP", "PLAY", "TEARDOWN"]);
    assert!(log.setup_urls[0].ends_with("trackID=3"));
    assert_eq!(log.data.len(), 3);
    assert_eq!(log.data[0], (0, Bytes::from(raw)));
    assert_eq!(log.data[1].1.len(), 12 + 160);
    assert_eq!(log.data[1].1[1] & 0x80, 0x80, "talk spurt marker");
    assert_eq!(log.data[2].1[1] & 0x80, 0);
}
