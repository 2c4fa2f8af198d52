use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::interleaved::{self, Frame};
use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::protocol::auth::{Authenticator, Credentials};
use crate::protocol::sdp::resolve_control;
use crate::protocol::{self, BACKCHANNEL_REQUIRE, RtspRequest, RtspResponse, SessionDescription};

const DEFAULT_PORT: u16 = 554;

/// Header values attached to every request once known.
#[derive(Debug, Default)]
struct CommonHeaders {
    user_agent: String,
    session: Option<String>,
    authorization: Option<Authenticator>,
}

/// Write half of an RTSP connection.
///
/// Cloned into the keepalive thread and the back-channel; all writes go
/// through one lock so requests and interleaved frames never interleave
/// on the wire.
#[derive(Clone)]
pub struct RequestWriter {
    stream: Arc<Mutex<TcpStream>>,
    cseq: Arc<AtomicU32>,
    headers: Arc<RwLock<CommonHeaders>>,
}

impl RequestWriter {
    /// Send a request with the connection's common headers. Returns the
    /// CSeq it was sent with; the response is read elsewhere.
    pub fn send(&self, request: RtspRequest) -> std::io::Result<u32> {
        let cseq = self.cseq.fetch_add(1, Ordering::SeqCst);
        let mut request = request
            .add_header("CSeq", &cseq.to_string())
            .add_header("User-Agent", &self.headers.read().user_agent);
        {
            let mut headers = self.headers.write();
            if let Some(session) = &headers.session {
                request = request.add_header("Session", session);
            }
            if let Some(auth) = &mut headers.authorization {
                let value = auth
                    .authorize(&request.method, &request.uri)
                    .map_err(|e| std::io::Error::other(format!("authorization: {e}")))?;
                request = request.add_header("Authorization", &value);
            }
        }

        tracing::debug!(method = %request.method, uri = %request.uri, cseq, "request");
        self.stream.lock().write_all(request.serialize().as_bytes())?;
        Ok(cseq)
    }

    /// Answer a request the camera sent us.
    pub fn send_response(&self, response: &RtspResponse) -> std::io::Result<()> {
        self.stream.lock().write_all(response.serialize().as_bytes())
    }

    /// Send one interleaved data frame.
    pub fn send_data(&self, channel: u8, payload: &[u8]) -> std::io::Result<()> {
        interleaved::write_frame(&mut *self.stream.lock(), channel, payload)
    }

    /// Current session id, once SETUP succeeded.
    pub fn session(&self) -> Option<String> {
        self.headers.read().session.clone()
    }

    /// Close both directions; unblocks a reader thread.
    pub fn shutdown(&self) {
        if let Err(e) = self.stream.lock().shutdown(Shutdown::Both) {
            tracing::trace!(error = %e, "socket shutdown");
        }
    }
}

/// Negotiated interleaved channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    pub rtp: u8,
    pub rtcp: u8,
}

/// RTSP client connection over TCP (RFC 2326), interleaved transport only.
///
/// Requests are synchronous until [`into_reader`](Self::into_reader) hands
/// the read half to the session's reader thread; after that, requests are
/// sent fire-and-forget through [`RequestWriter`].
pub struct RtspConnection {
    reader: BufReader<TcpStream>,
    writer: RequestWriter,
    url: String,
    /// Aggregate control URL from DESCRIBE; PLAY and TEARDOWN go here.
    aggregate_url: String,
    credentials: Option<Credentials>,
    public_methods: Vec<String>,
    session_timeout: Option<u64>,
    peer: SocketAddr,
}

impl RtspConnection {
    /// Open the TCP connection. No request is sent yet.
    pub fn connect(config: &CaptureConfig) -> Result<Self> {
        let (url, credentials, addr_host, port) = parse_url(&config.url)?;

        let addrs: Vec<SocketAddr> = (addr_host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| CaptureError::Connect(format!("resolve {addr_host}: {e}")))?
            .collect();
        let mut last_err = None;
        let mut stream = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, config.io_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = stream.ok_or_else(|| {
            CaptureError::Connect(match last_err {
                Some(e) => format!("{addr_host}:{port}: {e}"),
                None => format!("{addr_host}: no addresses"),
            })
        })?;

        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(config.io_timeout))?;
        stream.set_write_timeout(Some(config.io_timeout))?;
        let peer = stream.peer_addr()?;
        let write_half = stream.try_clone()?;

        tracing::info!(%peer, url = %url, "connected to camera");

        Ok(Self {
            reader: BufReader::new(stream),
            writer: RequestWriter {
                stream: Arc::new(Mutex::new(write_half)),
                cseq: Arc::new(AtomicU32::new(1)),
                headers: Arc::new(RwLock::new(CommonHeaders {
                    user_agent: config.user_agent.clone(),
                    ..CommonHeaders::default()
                })),
            },
            aggregate_url: url.clone(),
            url,
            credentials,
            public_methods: Vec::new(),
            session_timeout: None,
            peer,
        })
    }

    /// Request URL without credentials.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Session-level control URL, valid after [`describe`](Self::describe).
    pub fn aggregate_url(&self) -> &str {
        &self.aggregate_url
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn writer(&self) -> RequestWriter {
        self.writer.clone()
    }

    /// Session timeout announced in the `Session` header, in seconds.
    pub fn session_timeout(&self) -> Option<u64> {
        self.session_timeout
    }

    /// Method for keepalive requests: `GET_PARAMETER` when the camera
    /// advertises it, `OPTIONS` otherwise.
    pub fn keepalive_method(&self) -> &'static str {
        if self
            .public_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case("GET_PARAMETER"))
        {
            "GET_PARAMETER"
        } else {
            "OPTIONS"
        }
    }

    /// Send a request and wait for its response, retrying once with the
    /// URL's credentials on `401` (Digest when offered, else Basic).
    pub fn request(&mut self, request: RtspRequest) -> Result<RtspResponse> {
        let response = self.exchange(request.clone())?;
        if response.status_code != 401 {
            return Ok(response);
        }

        let Some(credentials) = &self.credentials else {
            return Err(CaptureError::Unauthorized(
                "camera requires credentials, none in url".into(),
            ));
        };
        if self.writer.headers.read().authorization.is_some() {
            return Err(CaptureError::Unauthorized("credentials rejected".into()));
        }
        let auth =
            Authenticator::from_challenges(credentials, response.get_headers("WWW-Authenticate"))
                .map_err(CaptureError::Unauthorized)?;

        tracing::debug!(
            username = %credentials.username,
            scheme = auth.scheme(),
            "retrying with authorization"
        );
        self.writer.headers.write().authorization = Some(auth);
        let retry = self.exchange(request)?;
        if retry.status_code == 401 {
            return Err(CaptureError::Unauthorized("credentials rejected".into()));
        }
        Ok(retry)
    }

    fn exchange(&mut self, request: RtspRequest) -> Result<RtspResponse> {
        let cseq = self.writer.send(request)?;
        let cseq = cseq.to_string();
        loop {
            match interleaved::read_frame(&mut self.reader)? {
                Frame::Response(response) if response.cseq() == Some(cseq.as_str()) => {
                    tracing::debug!(
                        status = response.status_code,
                        cseq = %cseq,
                        "response"
                    );
                    return Ok(response);
                }
                Frame::Response(response) => {
                    tracing::debug!(cseq = ?response.cseq(), "ignoring unmatched response");
                }
                Frame::Request(req) => {
                    answer_camera_request(&self.writer, &req)?;
                }
                Frame::Data { channel, payload } => {
                    tracing::trace!(channel, len = payload.len(), "data before response, dropped");
                }
            }
        }
    }

    /// OPTIONS: records the advertised methods.
    pub fn options(&mut self) -> Result<()> {
        let response = self.request(RtspRequest::new("OPTIONS", &self.url))?;
        if !response.is_success() {
            return Err(CaptureError::Connect(format!(
                "OPTIONS returned {} {}",
                response.status_code, response.status_text
            )));
        }
        self.public_methods = response
            .get_header("Public")
            .map(|p| p.split(',').map(|m| m.trim().to_string()).collect())
            .unwrap_or_default();
        Ok(())
    }

    /// DESCRIBE: returns the session description and the base URL for
    /// per-media control attributes.
    pub fn describe(&mut self, back_channel: bool) -> Result<(SessionDescription, String)> {
        let mut request = RtspRequest::new("DESCRIBE", &self.url).add_header("Accept", "application/sdp");
        if back_channel {
            request = request.add_header("Require", BACKCHANNEL_REQUIRE);
        }

        let response = self.request(request)?;
        if !response.is_success() {
            return Err(CaptureError::Describe(format!(
                "{} {}",
                response.status_code, response.status_text
            )));
        }
        let body = response
            .body
            .as_deref()
            .ok_or_else(|| CaptureError::Describe("empty session description".into()))?;
        let sdp = SessionDescription::parse(body);

        let base = response
            .get_header("Content-Base")
            .or_else(|| response.get_header("Content-Location"))
            .unwrap_or(&self.url)
            .to_string();
        let base = resolve_control(&base, sdp.control.as_deref());
        self.aggregate_url = base.clone();
        Ok((sdp, base))
    }

    /// SETUP one media on the given channel pair.
    ///
    /// Returns `Ok(None)` when the camera refused this media; I/O and
    /// protocol failures are errors.
    pub fn setup(
        &mut self,
        url: &str,
        channels: Channels,
        back_channel: bool,
    ) -> Result<Option<Channels>> {
        let transport = format!(
            "RTP/AVP/TCP;unicast;interleaved={}-{}",
            channels.rtp, channels.rtcp
        );
        let mut request = RtspRequest::new("SETUP", url).add_header("Transport", &transport);
        if back_channel {
            request = request.add_header("Require", BACKCHANNEL_REQUIRE);
        }

        let response = self.request(request)?;
        if !response.is_success() {
            tracing::warn!(
                url,
                status = response.status_code,
                reason = %response.status_text,
                "SETUP refused"
            );
            return Ok(None);
        }

        if let Some(session) = response.get_header("Session") {
            let (id, timeout) = protocol::parse_session_header(session);
            self.writer.headers.write().session = Some(id);
            if timeout.is_some() {
                self.session_timeout = timeout;
            }
        }

        // The camera may assign different channels than requested.
        let granted = response
            .get_header("Transport")
            .and_then(parse_interleaved)
            .unwrap_or(channels);
        if granted != channels {
            tracing::debug!(?channels, ?granted, "camera reassigned interleaved channels");
        }
        Ok(Some(granted))
    }

    /// PLAY the whole session from now.
    pub fn play(&mut self) -> Result<()> {
        let request = RtspRequest::new("PLAY", &self.aggregate_url).add_header("Range", "npt=0.000-");
        let response = self.request(request)?;
        if !response.is_success() {
            return Err(CaptureError::Play(format!(
                "{} {}",
                response.status_code, response.status_text
            )));
        }
        Ok(())
    }

    /// Hand over the read half, e.g. to a reader thread. Any bytes already
    /// buffered stay with the returned reader.
    pub fn into_reader(self) -> (BufReader<TcpStream>, RequestWriter) {
        (self.reader, self.writer)
    }
}

/// Reply `501` to a request the camera sent on the connection.
pub fn answer_camera_request(writer: &RequestWriter, request: &RtspRequest) -> std::io::Result<()> {
    tracing::debug!(method = %request.method, "camera sent request, answering 501");
    let mut response = RtspResponse::not_implemented();
    if let Some(cseq) = request.cseq() {
        response = response.add_header("CSeq", cseq);
    }
    writer.send_response(&response)
}

/// Fire-and-forget TEARDOWN.
pub fn send_teardown(writer: &RequestWriter, url: &str) {
    if writer.session().is_none() {
        return;
    }
    if let Err(e) = writer.send(RtspRequest::new("TEARDOWN", url)) {
        tracing::debug!(error = %e, "TEARDOWN not sent");
    }
}

/// `interleaved=a-b` from a Transport header.
fn parse_interleaved(transport: &str) -> Option<Channels> {
    let value = transport
        .split(';')
        .find_map(|p| p.trim().strip_prefix("interleaved="))?;
    let (rtp, rtcp) = match value.split_once('-') {
        Some((a, b)) => (a.trim().parse().ok()?, b.trim().parse().ok()?),
        None => {
            let rtp: u8 = value.trim().parse().ok()?;
            (rtp, rtp.wrapping_add(1))
        }
    };
    Some(Channels { rtp, rtcp })
}

/// Split a camera URL into (url without credentials, credentials, host, port).
fn parse_url(raw: &str) -> Result<(String, Option<Credentials>, String, u16)> {
    let mut url = url::Url::parse(raw).map_err(|e| CaptureError::InvalidUrl(format!("{raw}: {e}")))?;
    if url.scheme() != "rtsp" {
        return Err(CaptureError::InvalidUrl(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| CaptureError::InvalidUrl(format!("{raw}: missing host")))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url.port().unwrap_or(DEFAULT_PORT);

    let credentials = (!url.username().is_empty()).then(|| Credentials {
        username: url.username().to_string(),
        password: url.password().unwrap_or_default().to_string(),
    });
    if credentials.is_some() {
        let _ = url.set_username("");
        let _ = url.set_password(None);
    }

    Ok((url.to_string(), credentials, host, port))
}

/// Interval between keepalive requests for a session timeout.
pub fn keepalive_interval(session_timeout: Option<u64>) -> Duration {
    const DEFAULT_TIMEOUT_SECS: u64 = 60;
    let timeout = session_timeout.unwrap_or(DEFAULT_TIMEOUT_SECS).max(2);
    Duration::from_secs(timeout / 2)
}
