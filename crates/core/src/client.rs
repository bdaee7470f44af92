//! Client facade: configuration, URL handling, and presentation
//! construction.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use url::Url;

use crate::error::{Result, RtspError};
use crate::event_loop::{AfterId, ConnectionRef, EventLoop};
use crate::presentation::Presentation;
use crate::protocol::headers::normalize_name;
use crate::reporter::Reporter;
use crate::transport::TransportKind;

/// Well-known RTSP port (RFC 2326 §4.2), used when the URL names none.
pub const DEFAULT_PORT: u16 = 554;

/// How request submission behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterfaceMode {
    /// Requests queue; the event loop dispatches them and completions fire
    /// as responses arrive.
    #[default]
    EventDriven,
    /// `send_request` writes, reads the full response, and returns it.
    Blocking,
}

/// Client-level configuration, applied to every presentation it creates.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub interface: InterfaceMode,
    /// Per-operation timeout; also the UDP retransmission budget.
    pub timeout: Duration,
    /// Body-read chunk size.
    pub buffer_size: usize,
    /// Upper bound on the event loop's active set.
    pub max_connections: usize,
    pub pipelining: bool,
    pub use_error_callback: bool,
    pub use_warning_callback: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interface: InterfaceMode::EventDriven,
            timeout: Duration::from_secs(60),
            buffer_size: 4096,
            max_connections: 12,
            pipelining: false,
            use_error_callback: true,
            use_warning_callback: true,
        }
    }
}

impl ClientConfig {
    /// Set an option by name.
    ///
    /// Names match irrespective of case, underscores, and a leading dash
    /// (`Timeout`, `timeout`, `-time_out` are all the same option).
    /// Unknown names are ignored with a warning; recognised names with
    /// unusable values are errors.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        match normalize_name(name).as_str() {
            "interface" => {
                self.interface = match normalize_name(value).as_str() {
                    "eventdriven" | "event-driven" => InterfaceMode::EventDriven,
                    "blocking" => InterfaceMode::Blocking,
                    _ => return Err(RtspError::BadInterface(value.to_string())),
                };
            }
            "timeout" => self.timeout = Duration::from_secs(parse_number(name, value)?),
            "buffersize" | "buffer-size" => self.buffer_size = parse_number(name, value)?,
            "maxactiveconnections" | "max-active-connections" => {
                self.max_connections = parse_number(name, value)?;
            }
            "pipelining" => self.pipelining = parse_flag(value),
            "useerrorcallback" | "use-error-callback" => {
                self.use_error_callback = parse_flag(value);
            }
            "usewarningcallback" | "use-warning-callback" => {
                self.use_warning_callback = parse_flag(value);
            }
            other => tracing::warn!(option = other, "unknown option ignored"),
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| RtspError::BadOption {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Top-level RTSP client.
///
/// Owns the event loop and the error/warning [`Reporter`], and constructs
/// [`Presentation`]s from URLs. In event-driven mode, drive everything with
/// [`run`](Self::run) or [`run_cycle`](Self::run_cycle); in blocking mode
/// the presentations transact synchronously and the loop stays idle.
pub struct Client {
    config: ClientConfig,
    reporter: Arc<Reporter>,
    event_loop: EventLoop,
    presentations: Vec<Arc<Mutex<Presentation>>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let reporter = Arc::new(Reporter::new(
            config.use_error_callback,
            config.use_warning_callback,
        ));
        Ok(Client {
            event_loop: EventLoop::new(config.max_connections)?,
            reporter,
            config,
            presentations: Vec::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The error/warning sink shared by everything this client creates.
    pub fn reporter(&self) -> Arc<Reporter> {
        self.reporter.clone()
    }

    /// Create a presentation for `url`.
    ///
    /// `rtsp://` selects stream transport, `rtspu://` datagram. A missing
    /// scheme is treated as `rtsp://`; any other scheme warns and is
    /// attempted as stream. The port defaults to 554. In event-driven mode
    /// the presentation is queued for admission to the event loop.
    pub fn presentation(&mut self, url: &str) -> Result<Arc<Mutex<Presentation>>> {
        let target = Target::parse(url, &self.reporter)?;
        tracing::info!(uri = %target.uri, kind = ?target.kind, "presentation created");
        let presentation = Presentation::new(
            target.kind,
            &target.host,
            target.port,
            &target.uri,
            &self.config,
            self.reporter.clone(),
        );
        let handle = Arc::new(Mutex::new(presentation));
        if self.config.interface == InterfaceMode::EventDriven {
            let conn: ConnectionRef = handle.clone();
            self.event_loop.admit(conn);
        }
        self.presentations.push(handle.clone());
        Ok(handle)
    }

    /// Terminate a presentation: remove it from the event loop, fail its
    /// queued requests, and close its socket.
    pub fn terminate(&mut self, presentation: &Arc<Mutex<Presentation>>) {
        let conn: ConnectionRef = presentation.clone();
        self.event_loop.remove(&conn);
        presentation.lock().terminate();
        self.presentations
            .retain(|p| !Arc::ptr_eq(p, presentation));
    }

    /// Run event-loop cycles until no work remains.
    pub fn run(&mut self) {
        self.event_loop.run();
    }

    /// Run one event-loop cycle; returns the number of events produced.
    pub fn run_cycle(&mut self) -> u64 {
        self.event_loop.run_cycle()
    }

    /// Schedule `callback` to run once on the event loop, `delay` from now.
    pub fn schedule_after(
        &mut self,
        delay: Duration,
        callback: impl FnOnce() + 'static,
    ) -> AfterId {
        self.event_loop.schedule_after(delay, callback)
    }

    /// Cancel a scheduled callback by id.
    pub fn cancel_after(&mut self, id: AfterId) -> bool {
        self.event_loop.cancel_after(id)
    }

    /// Register a hook invoked once per event-loop cycle; it reports
    /// whether it made progress.
    pub fn add_hook(&mut self, hook: impl FnMut() -> bool + 'static) {
        self.event_loop.add_hook(hook);
    }

    pub fn event_loop(&mut self) -> &mut EventLoop {
        &mut self.event_loop
    }
}

struct Target {
    kind: TransportKind,
    host: String,
    port: u16,
    uri: String,
}

impl Target {
    fn parse(raw: &str, reporter: &Reporter) -> Result<Target> {
        let candidate = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("rtsp://{raw}")
        };
        let parsed =
            Url::parse(&candidate).map_err(|e| RtspError::BadUrl(format!("{raw}: {e}")))?;
        let kind = match parsed.scheme() {
            "rtsp" => TransportKind::Stream,
            "rtspu" => TransportKind::Datagram,
            other => {
                reporter.warning(&format!(
                    "unrecognised scheme {other}://, attempting stream transport"
                ));
                TransportKind::Stream
            }
        };
        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(RtspError::BadUrl(format!("{raw}: missing host"))),
        };
        let port = parsed.port().unwrap_or(DEFAULT_PORT);
        Ok(Target {
            kind,
            host,
            port,
            uri: parsed.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_names_match_any_spelling() {
        let mut config = ClientConfig::default();
        config.set_option("Time_Out", "5").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));

        config.set_option("-interface", "Blocking").unwrap();
        assert_eq!(config.interface, InterfaceMode::Blocking);

        config.set_option("BufferSize", "512").unwrap();
        assert_eq!(config.buffer_size, 512);

        config.set_option("MaxActiveConnections", "3").unwrap();
        assert_eq!(config.max_connections, 3);

        config.set_option("Pipelining", "1").unwrap();
        assert!(config.pipelining);

        config.set_option("UseErrorCallback", "0").unwrap();
        assert!(!config.use_error_callback);
    }

    #[test]
    fn unknown_options_are_ignored() {
        let mut config = ClientConfig::default();
        config.set_option("FrobnicationLevel", "11").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn bad_option_values_are_errors() {
        let mut config = ClientConfig::default();
        assert!(matches!(
            config.set_option("interface", "threaded"),
            Err(RtspError::BadInterface(_))
        ));
        assert!(matches!(
            config.set_option("timeout", "soon"),
            Err(RtspError::BadOption { .. })
        ));
    }

    #[test]
    fn url_scheme_selects_the_transport() {
        let reporter = Reporter::default();
        let target = Target::parse("rtsp://h/a", &reporter).unwrap();
        assert_eq!(target.kind, TransportKind::Stream);
        assert_eq!(target.host, "h");
        assert_eq!(target.port, DEFAULT_PORT);
        assert_eq!(target.uri, "rtsp://h/a");

        let target = Target::parse("rtspu://h:8554/a", &reporter).unwrap();
        assert_eq!(target.kind, TransportKind::Datagram);
        assert_eq!(target.port, 8554);
    }

    #[test]
    fn missing_scheme_defaults_to_stream() {
        let reporter = Reporter::default();
        let target = Target::parse("h:554/a", &reporter).unwrap();
        assert_eq!(target.kind, TransportKind::Stream);
        assert_eq!(target.host, "h");
        assert_eq!(target.port, 554);
    }

    #[test]
    fn foreign_scheme_warns_and_tries_stream() {
        let reporter = Reporter::default();
        let target = Target::parse("http://h/a", &reporter).unwrap();
        assert_eq!(target.kind, TransportKind::Stream);
        assert!(
            reporter
                .last_warning()
                .is_some_and(|w| w.contains("http"))
        );
    }

    #[test]
    fn hostless_url_is_rejected() {
        let reporter = Reporter::default();
        assert!(matches!(
            Target::parse("rtsp:///nohost", &reporter),
            Err(RtspError::BadUrl(_))
        ));
    }
}
