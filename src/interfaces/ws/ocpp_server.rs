//! OCPP WebSocket server.
//!
//! Accepts station connections at `ws(s)://<host>:<port>/ocpp/{id}`
//! (legacy 1.6 stations at `/ocpp/1.6/{id}`). Admission runs inside the
//! upgrade handshake; an admitted connection gets a session with one
//! reader loop (this task) and one writer task. All socket writes are
//! linearized through the writer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::application::events::SharedEventPublisher;
use crate::application::handlers::SharedDispatcher;
use crate::application::services::{SharedChargePointService, SharedV2gEngine};
use crate::application::session::{
    OutboundFrame, RegisterOutcome, Session, SessionConfig, SharedSessionRegistry,
};
use crate::domain::{DomainEvent, OcppErrorCode};
use crate::support::ocpp_frame::OcppFrame;
use crate::support::shutdown::ShutdownSignal;

use super::admission::{Admission, AdmissionControl, AdmissionError, SecurityConfig};

/// Per-frame write deadline.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Dependencies shared by every connection task.
struct ServerContext {
    admission: AdmissionControl,
    dispatcher: SharedDispatcher,
    registry: SharedSessionRegistry,
    publisher: SharedEventPublisher,
    charge_points: SharedChargePointService,
    v2g: SharedV2gEngine,
    session_config: SessionConfig,
}

pub struct OcppServer {
    host: String,
    port: u16,
    context: Arc<ServerContext>,
    tls: Option<TlsAcceptor>,
    shutdown: Option<ShutdownSignal>,
}

impl OcppServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        security: SecurityConfig,
        session_config: SessionConfig,
        dispatcher: SharedDispatcher,
        registry: SharedSessionRegistry,
        publisher: SharedEventPublisher,
        charge_points: SharedChargePointService,
        v2g: SharedV2gEngine,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            context: Arc::new(ServerContext {
                admission: AdmissionControl::new(security),
                dispatcher,
                registry,
                publisher,
                charge_points,
                v2g,
                session_config,
            }),
            tls: None,
            shutdown: None,
        }
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;

        let scheme = if self.tls.is_some() { "wss" } else { "ws" };
        info!("OCPP central system listening on {}://{}", scheme, addr);
        info!(
            "   Stations connect to: {}://{}/ocpp/{{charge_point_id}}",
            scheme, addr
        );

        loop {
            let accepted = if let Some(shutdown) = &self.shutdown {
                tokio::select! {
                    result = listener.accept() => Some(result),
                    _ = shutdown.notified().wait() => None,
                }
            } else {
                Some(listener.accept().await)
            };

            match accepted {
                Some(Ok((stream, addr))) => self.spawn_connection(stream, addr),
                Some(Err(e)) => error!("Failed to accept connection: {}", e),
                None => {
                    info!("OCPP server received shutdown signal");
                    self.context.registry.close_all("server shutdown");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let context = self.context.clone();
        let tls = self.tls.clone();

        tokio::spawn(async move {
            let result = match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => serve_socket(context, tls_stream, addr).await,
                    Err(e) => {
                        warn!(%addr, error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => serve_socket(context, stream, addr).await,
            };
            if let Err(e) = result {
                warn!(%addr, error = %e, "Connection ended with error");
            }
        });
    }
}

/// Upgrade, admit, and drive one connection to completion.
async fn serve_socket<S>(
    context: Arc<ServerContext>,
    stream: S,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let peer_ip = addr.ip();
    let mut admitted: Option<Admission> = None;

    let accept_result = {
        let admitted = &mut admitted;
        let admission_ctl = &context.admission;
        tokio_tungstenite::accept_hdr_async(stream, |req: &Request, mut response: Response| {
            let path = req.uri().path();
            let header = |name: &str| {
                req.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned)
            };

            match admission_ctl.admit(
                path,
                header("Sec-WebSocket-Protocol").as_deref(),
                header("Origin").as_deref(),
                header("X-Forwarded-For").as_deref(),
                header("X-Real-IP").as_deref(),
                peer_ip,
            ) {
                Ok(admission) => {
                    if let Some(token) = &admission.subprotocol {
                        if let Ok(value) = token.parse() {
                            response
                                .headers_mut()
                                .insert("Sec-WebSocket-Protocol", value);
                        }
                    }
                    *admitted = Some(admission);
                    Ok(response)
                }
                Err(e) => {
                    warn!(%addr, path, error = %e, "Connection refused at admission");
                    metrics::counter!("ocpp_admission_rejections_total").increment(1);
                    let status = match e {
                        AdmissionError::TooManyConnections(_) => StatusCode::TOO_MANY_REQUESTS,
                        // Allow-list configured, id absent: Unauthorized.
                        AdmissionError::Unauthorized
                        | AdmissionError::ChargePointNotAllowed(_) => StatusCode::UNAUTHORIZED,
                        // No allow-list; the path is simply malformed.
                        AdmissionError::MissingChargePointId => StatusCode::NOT_FOUND,
                        _ => StatusCode::FORBIDDEN,
                    };
                    let mut refusal = ErrorResponse::new(Some(e.to_string()));
                    *refusal.status_mut() = status;
                    Err(refusal)
                }
            }
        })
        .await
    };

    let ws_stream = match accept_result {
        Ok(ws) => ws,
        Err(e) => {
            // The per-IP slot was taken if admission succeeded before the
            // handshake failed.
            if let Some(admission) = admitted {
                context.admission.release(admission.client_ip);
            }
            return Err(e.into());
        }
    };

    let admission = match admitted {
        Some(a) => a,
        None => return Ok(()), // refused inside the callback
    };

    info!(
        charge_point_id = admission.charge_point_id.as_str(),
        version = %admission.version,
        %addr,
        "Station connected"
    );

    let (session, outbound_rx) = Session::new(
        admission.charge_point_id.clone(),
        admission.version,
        addr.to_string(),
        context.session_config.clone(),
    );

    match context.registry.register(session.clone()) {
        RegisterOutcome::New => {}
        RegisterOutcome::Evicted(_) => {
            // Predecessor already reached Closed inside register.
        }
        RegisterOutcome::Debounced { seconds_remaining } => {
            warn!(
                charge_point_id = admission.charge_point_id.as_str(),
                seconds_remaining, "Debounced reconnect — dropping"
            );
            context.admission.release(admission.client_ip);
            return Ok(());
        }
    }

    context
        .publisher
        .publish(DomainEvent::ChargePointConnected {
            charge_point_id: admission.charge_point_id.clone(),
            remote_addr: Some(addr.to_string()),
            timestamp: Utc::now(),
        })
        .await;

    let (ws_sender, ws_receiver) = ws_stream.split();

    // Single writer for the session's lifetime.
    let writer = tokio::spawn(run_writer(session.clone(), outbound_rx, ws_sender));

    run_reader(&context, &session, ws_receiver).await;

    // Reader is done: close (idempotent), stop the writer, clean up.
    session.close("connection closed");
    let _ = writer.await;

    let was_current = context.registry.unregister(&session);
    context.admission.release(admission.client_ip);

    if was_current {
        context.v2g.clear_charge_point(&admission.charge_point_id);
        if let Err(e) = context
            .charge_points
            .mark_offline(&admission.charge_point_id)
            .await
        {
            warn!(
                charge_point_id = admission.charge_point_id.as_str(),
                error = %e,
                "Failed to mark station offline"
            );
        }
        context
            .publisher
            .publish(DomainEvent::ChargePointDisconnected {
                charge_point_id: admission.charge_point_id.clone(),
                reason: None,
                timestamp: Utc::now(),
            })
            .await;
    }

    info!(
        charge_point_id = admission.charge_point_id.as_str(),
        "Station disconnected"
    );
    Ok(())
}

/// Writer task: drain the outbound FIFO onto the socket with a per-frame
/// deadline. A failed or overdue write closes the session.
async fn run_writer<S>(
    session: Arc<Session>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut ws_sender: S,
) where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        let frame = tokio::select! {
            frame = outbound_rx.recv() => frame,
            _ = session.close_notified().wait() => break,
        };
        let Some(frame) = frame else { break };

        let text = frame.text().to_string();
        debug!(
            charge_point_id = session.charge_point_id(),
            "-> {}", text
        );

        match tokio::time::timeout(WRITE_DEADLINE, ws_sender.send(Message::Text(text))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    charge_point_id = session.charge_point_id(),
                    error = %e,
                    "Write failed"
                );
                session.close("write error");
                break;
            }
            Err(_) => {
                error!(
                    charge_point_id = session.charge_point_id(),
                    deadline_s = WRITE_DEADLINE.as_secs(),
                    "Write deadline exceeded"
                );
                session.close("write deadline exceeded");
                break;
            }
        }
    }

    let _ = ws_sender.close().await;
}

/// Reader loop: decode each text frame and dispatch it. Decoding failures
/// answer `FormationViolation` when the message id is recoverable and are
/// dropped otherwise; the session stays up either way.
async fn run_reader<S>(
    context: &Arc<ServerContext>,
    session: &Arc<Session>,
    mut ws_receiver: S,
) where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::select! {
            message = ws_receiver.next() => message,
            _ = session.close_notified().wait() => break,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                debug!(
                    charge_point_id = session.charge_point_id(),
                    "<- {}", text
                );
                session.touch();

                match OcppFrame::parse(&text) {
                    Ok(frame) => context.dispatcher.dispatch(session, frame).await,
                    Err(e) => {
                        metrics::counter!("ocpp_malformed_frames_total").increment(1);
                        match OcppFrame::recover_unique_id(&text) {
                            Some(message_id) => {
                                session.reply_error(
                                    &message_id,
                                    OcppErrorCode::FormationViolation,
                                    &e.to_string(),
                                );
                            }
                            None => {
                                warn!(
                                    charge_point_id = session.charge_point_id(),
                                    error = %e,
                                    "Dropping malformed frame without recoverable id"
                                );
                            }
                        }
                    }
                }
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                session.touch();
            }
            Some(Ok(Message::Binary(data))) => {
                warn!(
                    charge_point_id = session.charge_point_id(),
                    bytes = data.len(),
                    "Ignoring binary message"
                );
            }
            Some(Ok(Message::Close(frame))) => {
                info!(
                    charge_point_id = session.charge_point_id(),
                    ?frame,
                    "Close frame received"
                );
                break;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                error!(
                    charge_point_id = session.charge_point_id(),
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
            None => break,
        }
    }
}
