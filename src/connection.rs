//! One TLS or DTLS connection, record layer and handshake together.
//!
//! ```text
//!            begin_handshake / first record
//!   Start ───────────────────────────────────▶ Handshake
//!                                                  │ both Finished
//!                                                  ▼
//!   Renegotiate ◀─────── HelloRequest/ClientHello  Data
//!        │                                          ▲
//!        └──────────────── both Finished ───────────┘
//!
//!   any fatal condition ──▶ Error ──▶ Closed
//! ```
//!
//! The connection is sans-IO: feed it with [`Connection::handle_packet`]
//! and drain it with [`Connection::poll_output`]. Every operation takes
//! `&mut self`, so a cipher change and the Finished that follows it can
//! never be interleaved with application writes.

use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use crate::buffer::Buf;
use crate::handshake::{DelegatedTask, HandshakeConsumer, Handshaker, Outbound};
use crate::record::{InputRecord, OutputRecord, Plaintext, Transport, NO_CIPHER_ERROR};
use crate::types::{AlertDescription, AlertLevel, ContentType, ProtocolVersion};
use crate::{Config, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Nothing sent or received yet.
    Start,
    /// Initial handshake.
    Handshake,
    /// Application data flows.
    Data,
    /// A handshake on top of an established connection.
    Renegotiate,
    /// A fatal condition is being reported.
    Error,
    Closed,
}

/// Something for the caller to act on.
#[derive(Debug, PartialEq, Eq)]
pub enum Output {
    /// Wire bytes to send. A whole datagram for DTLS.
    Packet(Buf),
    /// Decrypted application data.
    ApplicationData(Buf),
    /// A handshake completed.
    Connected,
    /// A delegated task waits for [`Connection::delegated_task`].
    NeedTask,
    /// The peer sent close_notify.
    Closed,
    /// Nothing to do until more input arrives.
    Idle,
}

/// A delegated task, wrapped to report back to its connection.
pub type TaskRunner = Box<dyn FnOnce() + Send + 'static>;

pub struct Connection {
    config: Arc<Config>,
    transport: Transport,
    is_client: bool,
    state: ConnectionState,
    input: InputRecord,
    output: OutputRecord,

    /// Present while a handshake runs.
    handshaker: Option<Handshaker>,
    /// Parked between handshakes.
    consumer: Option<Box<dyn HandshakeConsumer>>,

    version: Option<ProtocolVersion>,
    secure_renegotiation: bool,
    /// The record after a ChangeCipherSpec must be Finished.
    expecting_finished: bool,

    inbound_done: bool,
    outbound_done: bool,
    close_reason: Option<AlertDescription>,

    events: VecDeque<Output>,
    tasks: VecDeque<DelegatedTask>,
    tasks_outstanding: usize,
    task_tx: Sender<Result<(), Error>>,
    task_rx: Receiver<Result<(), Error>>,
}

impl Connection {
    pub fn new(
        config: Arc<Config>,
        transport: Transport,
        is_client: bool,
        consumer: Box<dyn HandshakeConsumer>,
    ) -> Self {
        let (task_tx, task_rx) = mpsc::channel();
        Connection {
            input: InputRecord::new(config.clone(), transport),
            output: OutputRecord::new(config.clone(), transport),
            config,
            transport,
            is_client,
            state: ConnectionState::Start,
            handshaker: None,
            consumer: Some(consumer),
            version: None,
            secure_renegotiation: false,
            expecting_finished: false,
            inbound_done: false,
            outbound_done: false,
            close_reason: None,
            events: VecDeque::new(),
            tasks: VecDeque::new(),
            tasks_outstanding: 0,
            task_tx,
            task_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_client(&self) -> bool {
        self.is_client
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    pub fn is_handshaking(&self) -> bool {
        self.handshaker.is_some()
    }

    /// The alert that ended the connection, ours or the peer's.
    pub fn close_reason(&self) -> Option<AlertDescription> {
        self.close_reason
    }

    /// Start the initial handshake, or renegotiate an established one.
    pub fn begin_handshake(&mut self) -> Result<(), Error> {
        self.check_task_thrown()?;

        match self.state {
            ConnectionState::Error | ConnectionState::Closed => return Err(Error::Closed),
            ConnectionState::Renegotiate => return Ok(()),
            ConnectionState::Data => self.renegotiation_allowed()?,
            _ => {}
        }

        match self.kickstart_handshake().and_then(|_| self.drain_handshake()) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn renegotiation_allowed(&self) -> Result<(), Error> {
        if self.transport.is_dtls() {
            return Err(Error::IllegalState("DTLS renegotiation is not supported"));
        }
        if !self.secure_renegotiation {
            if !self.config.allow_unsafe_renegotiation() {
                return Err(Error::IllegalState("Insecure renegotiation is not allowed"));
            }
            warn!("Using insecure renegotiation");
        }
        Ok(())
    }

    fn init_handshaker(&mut self) -> Result<(), Error> {
        match self.state {
            ConnectionState::Start => self.state = ConnectionState::Handshake,
            ConnectionState::Data => self.state = ConnectionState::Renegotiate,
            _ => return Ok(()),
        }

        let consumer = self
            .consumer
            .take()
            .ok_or(Error::IllegalState("handshake consumer missing"))?;
        let mut handshaker = Handshaker::new(
            self.config.clone(),
            consumer,
            self.is_client,
            self.transport.is_dtls(),
        );
        handshaker.set_secure_renegotiation(self.secure_renegotiation);
        self.handshaker = Some(handshaker);

        debug!("Connection {:?}", self.state);
        Ok(())
    }

    fn kickstart_handshake(&mut self) -> Result<(), Error> {
        match self.state {
            ConnectionState::Start | ConnectionState::Data => self.init_handshaker()?,
            ConnectionState::Handshake | ConnectionState::Renegotiate => {}
            ConnectionState::Error | ConnectionState::Closed => return Err(Error::Closed),
        }

        let renegotiating = self.state == ConnectionState::Renegotiate;
        let handshaker = self
            .handshaker
            .as_mut()
            .ok_or(Error::IllegalState("no handshaker"))?;

        if !handshaker.is_activated() {
            // A client sends its hello on activation.
            handshaker.activate()?;
            if !handshaker.is_client() && renegotiating {
                handshaker.kickstart()?;
            }
        }
        Ok(())
    }

    /// Feed received bytes: a chunk of the stream, whole TLS records or one
    /// datagram. Returns how many bytes were taken.
    pub fn handle_packet(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.check_task_thrown()?;
        if self.inbound_done || self.state == ConnectionState::Error {
            return Err(Error::Closed);
        }

        if matches!(self.state, ConnectionState::Start | ConnectionState::Handshake) {
            if let Err(e) = self.kickstart_handshake().and_then(|_| self.drain_handshake()) {
                return Err(self.fail(e));
            }
        }

        // Nothing more is read until delegated work has reported back.
        if self.task_pending() {
            trace!("Delegated task outstanding, not reading");
            return Ok(0);
        }

        let mut offset = 0;
        loop {
            let decoded = match self.input.decode(&data[offset..]) {
                Ok(d) => d,
                Err(e) => return self.fail_decode(e, data.len()),
            };
            offset += decoded.consumed;

            if self.input.take_peer_retransmitted() {
                debug!("Peer retransmitted, resend our last flight");
                if let Err(e) = self.output.retransmit() {
                    return Err(self.fail(e));
                }
            }

            if decoded.plaintexts.is_empty() {
                break;
            }

            for plaintext in decoded.plaintexts {
                if let Err(e) = self.process_input_record(plaintext) {
                    return Err(self.fail(e));
                }
                if self.inbound_done {
                    return Ok(data.len());
                }
            }
        }

        Ok(offset)
    }

    fn fail_decode(&mut self, e: Error, len: usize) -> Result<usize, Error> {
        if self.transport.is_dtls() && e.is_discard() {
            // RFC 6347 4.1.2.7: drop the datagram, keep the connection.
            debug!("Discard datagram: {}", e);
            return Ok(len);
        }

        if matches!(e, Error::UnsupportedSslv2Hello) {
            if !self.transport.is_dtls() {
                if let Err(w) = self.output.write_raw(&NO_CIPHER_ERROR) {
                    debug!("SSLv2 error message not sent: {}", w);
                }
            }
            return Err(self.fatal(AlertDescription::UnexpectedMessage, e));
        }

        Err(self.fail(e))
    }

    fn process_input_record(&mut self, plaintext: Plaintext) -> Result<(), Error> {
        match plaintext.content_type {
            ContentType::Handshake => self.process_handshake_record(plaintext)?,

            ContentType::ApplicationData => {
                if !matches!(
                    self.state,
                    ConnectionState::Data | ConnectionState::Renegotiate | ConnectionState::Closed
                ) {
                    return Err(Error::fatal(
                        AlertDescription::UnexpectedMessage,
                        format!("Data received in non-data state: {:?}", self.state),
                    ));
                }
                if self.expecting_finished {
                    return Err(Error::fatal(
                        AlertDescription::UnexpectedMessage,
                        "Expecting finished message, received data",
                    ));
                }
                if self.handshaker.is_none() {
                    // The peer has our last flight.
                    self.output.finish_flights();
                }
                if !self.inbound_done {
                    self.events
                        .push_back(Output::ApplicationData(plaintext.fragment));
                }
            }

            ContentType::Alert => self.recv_alert(&plaintext.fragment)?,

            ContentType::ChangeCipherSpec => {
                if !matches!(
                    self.state,
                    ConnectionState::Handshake | ConnectionState::Renegotiate
                ) {
                    return Err(Error::fatal(
                        AlertDescription::UnexpectedMessage,
                        format!("illegal change cipher spec msg, conn state = {:?}", self.state),
                    ));
                }
                if plaintext.fragment[..] != [1] {
                    return Err(Error::fatal(
                        AlertDescription::UnexpectedMessage,
                        "Malformed change cipher spec msg",
                    ));
                }

                let handshaker = self
                    .handshaker
                    .as_mut()
                    .ok_or(Error::IllegalState("no handshaker"))?;
                let protection = handshaker.receive_change_cipher_spec()?;
                self.input.change_read_state(protection);
                self.expecting_finished = true;
            }

            ContentType::Unknown(t) => {
                warn!("Ignoring record of unknown type {}", t);
            }
        }

        if self.state == ConnectionState::Data && !self.inbound_done && self.input.seq_num_is_huge() {
            debug!("Request renegotiation to avoid sequence number overflow");
            self.request_renegotiation()?;
        }
        Ok(())
    }

    fn process_handshake_record(&mut self, plaintext: Plaintext) -> Result<(), Error> {
        match self.state {
            ConnectionState::Data => {
                if let Err(e) = self.renegotiation_allowed() {
                    warn!("Refusing renegotiation: {}", e);
                    self.send_alert(AlertLevel::Warning, AlertDescription::NoRenegotiation);
                    return Ok(());
                }
                self.init_handshaker()?;
            }
            ConnectionState::Start => self.init_handshaker()?,
            ConnectionState::Error | ConnectionState::Closed => {
                return Err(Error::fatal(
                    AlertDescription::UnexpectedMessage,
                    "Handshake message on a closed connection",
                ));
            }
            ConnectionState::Handshake | ConnectionState::Renegotiate => {}
        }

        let expecting_finished = std::mem::take(&mut self.expecting_finished);
        let handshaker = self
            .handshaker
            .as_mut()
            .ok_or(Error::IllegalState("no handshaker"))?;
        if !handshaker.is_activated() {
            handshaker.activate()?;
        }
        handshaker.process_record(&plaintext, expecting_finished)?;

        self.drain_handshake()
    }

    fn request_renegotiation(&mut self) -> Result<(), Error> {
        if let Err(e) = self.renegotiation_allowed() {
            warn!("No renegotiation: {}", e);
            return Ok(());
        }
        self.kickstart_handshake()?;
        self.drain_handshake()
    }

    /// Move whatever the handshake produced into records.
    fn drain_handshake(&mut self) -> Result<(), Error> {
        let Some(handshaker) = self.handshaker.as_mut() else {
            return Ok(());
        };

        if let Some(v) = handshaker.version() {
            if self.version != Some(v) {
                self.version = Some(v);
                self.input.set_version(v);
                self.output.set_version(v);
            }
        }

        self.tasks.extend(handshaker.take_delegated_tasks());

        let mut sent = false;
        while let Some(out) = handshaker.take_outbound() {
            sent = true;
            match out {
                Outbound::Message(m) => self.output.encode_handshake(m)?,
                Outbound::ChangeCipherSpec => {
                    Self::change_write_ciphers(&mut self.output, handshaker)?;
                }
            }
        }
        self.output.flush()?;

        if self.transport.is_dtls() && handshaker.expects_peer_change_cipher_spec() {
            self.input.expecting_finish_flight();
        }

        if handshaker.is_finished() {
            self.finish_handshake(sent);
        }
        Ok(())
    }

    /// ChangeCipherSpec under the old keys, then switch to the pending ones.
    ///
    /// The Finished queued right behind goes out under the new keys.
    fn change_write_ciphers(output: &mut OutputRecord, handshaker: &mut Handshaker) -> Result<(), Error> {
        output.encode_change_cipher_spec()?;
        let protection = handshaker.write_protection()?;
        output.change_write_state(protection);
        Ok(())
    }

    fn finish_handshake(&mut self, sent_last_flight: bool) {
        let Some(handshaker) = self.handshaker.take() else {
            return;
        };
        self.secure_renegotiation = handshaker.secure_renegotiation();
        self.consumer = Some(handshaker.into_consumer());

        if matches!(
            self.state,
            ConnectionState::Handshake | ConnectionState::Renegotiate
        ) {
            self.state = ConnectionState::Data;
        }

        // Whoever sent the last flight keeps it until the peer shows it
        // arrived.
        if !sent_last_flight {
            self.output.finish_flights();
        }

        info!(
            "Handshake complete, {:?}, secure renegotiation: {}",
            self.version, self.secure_renegotiation
        );
        self.events.push_back(Output::Connected);
    }

    fn recv_alert(&mut self, fragment: &[u8]) -> Result<(), Error> {
        if fragment.len() < 2 {
            return Err(Error::fatal(
                AlertDescription::IllegalParameter,
                "Short alert message",
            ));
        }
        let level = AlertLevel::from_u8(fragment[0]);
        let description = AlertDescription::from_u8(fragment[1]);
        debug!("Received {:?} alert: {}", level, description);

        match level {
            AlertLevel::Warning if description == AlertDescription::CloseNotify => {
                if self.state == ConnectionState::Handshake {
                    return Err(Error::fatal(
                        AlertDescription::UnexpectedMessage,
                        "Received close_notify during handshake",
                    ));
                }
                self.close_inbound_internal();
                self.events.push_back(Output::Closed);
            }
            AlertLevel::Warning => {
                if let Some(handshaker) = self.handshaker.as_mut() {
                    handshaker.handle_warning(description)?;
                }
            }
            _ => {
                self.close_reason = Some(description);
                self.shutdown();
                return Err(Error::PeerAlert(description));
            }
        }
        Ok(())
    }

    fn send_alert(&mut self, level: AlertLevel, description: AlertDescription) {
        if self.state >= ConnectionState::Closed {
            return;
        }
        // Nothing goes out before the initial handshake really started.
        let activated = self
            .handshaker
            .as_ref()
            .map(|h| h.is_activated())
            .unwrap_or(false);
        if self.state <= ConnectionState::Handshake && !activated {
            return;
        }

        debug!("Send {:?} alert: {}", level, description);
        if let Err(e) = self.output.encode_alert(level, description) {
            debug!("Alert not sent: {}", e);
        }
    }

    /// Map a failure to its alert and tear down.
    fn fail(&mut self, e: Error) -> Error {
        let alert = match &e {
            Error::TransmitQueueFull | Error::ReceiveQueueFull => return e,
            Error::BadRecordMac if self.state != ConnectionState::Data => {
                AlertDescription::HandshakeFailure
            }
            Error::SequenceOverflow => AlertDescription::HandshakeFailure,
            other => other.alert(),
        };
        self.fatal(alert, e)
    }

    fn fatal(&mut self, alert: AlertDescription, error: Error) -> Error {
        if self.close_reason.is_some() {
            return error;
        }
        warn!("Fatal {}: {}", alert, error);

        let previous = self.state;
        self.state = ConnectionState::Error;
        self.input.close();
        self.inbound_done = true;

        if previous != ConnectionState::Start {
            self.send_alert(AlertLevel::Fatal, alert);
        }
        self.close_reason = Some(alert);
        self.shutdown();

        match error {
            Error::Fatal { .. } | Error::PeerAlert(_) => error,
            other if other.alert() == alert => other,
            other => Error::fatal(alert, other.to_string()),
        }
    }

    fn shutdown(&mut self) {
        self.input.close();
        self.inbound_done = true;
        self.output.close();
        self.outbound_done = true;
        self.handshaker = None;
        self.state = ConnectionState::Closed;
    }

    /// Send close_notify. Already queued output can still be polled.
    pub fn close(&mut self) {
        self.close_outbound_internal();
    }

    fn close_outbound_internal(&mut self) {
        if self.outbound_done {
            return;
        }

        match self.state {
            ConnectionState::Start => {
                self.output.close();
                self.input.close();
                self.inbound_done = true;
            }
            ConnectionState::Error | ConnectionState::Closed => {}
            _ => {
                self.send_alert(AlertLevel::Warning, AlertDescription::CloseNotify);
                self.output.close();
            }
        }
        self.outbound_done = true;
        self.state = ConnectionState::Closed;
    }

    fn close_inbound_internal(&mut self) {
        if self.inbound_done {
            return;
        }
        self.close_outbound_internal();
        self.input.close();
        self.inbound_done = true;
        self.state = ConnectionState::Closed;
    }

    /// Encrypt and queue application data.
    pub fn write_app_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.check_task_thrown()?;
        if self.outbound_done {
            return Err(Error::Closed);
        }
        match self.state {
            ConnectionState::Start | ConnectionState::Handshake => {
                return Err(Error::IllegalState(
                    "application data before the handshake completed",
                ));
            }
            ConnectionState::Error | ConnectionState::Closed => return Err(Error::Closed),
            ConnectionState::Data | ConnectionState::Renegotiate => {}
        }

        if let Err(e) = self.output.write_app_data(data) {
            return Err(self.fail(e));
        }

        if self.state == ConnectionState::Data && self.output.seq_num_is_huge() {
            debug!("Request renegotiation to avoid sequence number overflow");
            if let Err(e) = self.request_renegotiation() {
                return Err(self.fail(e));
            }
        }
        Ok(())
    }

    /// DTLS: resend the last flight, e.g. when the retransmission timer
    /// fires. `false` if there is nothing to resend.
    pub fn retransmit(&mut self) -> Result<bool, Error> {
        if !self.transport.is_dtls() || self.outbound_done {
            return Ok(false);
        }
        match self.output.retransmit() {
            Ok(resent) => Ok(resent),
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn poll_output(&mut self) -> Output {
        if let Some(packet) = self.output.poll_output() {
            return Output::Packet(packet);
        }
        if let Some(event) = self.events.pop_front() {
            return event;
        }
        if !self.tasks.is_empty() {
            return Output::NeedTask;
        }
        Output::Idle
    }

    /// Take the next delegated task. Run it anywhere; its outcome is
    /// picked up by the next read or write.
    pub fn delegated_task(&mut self) -> Option<TaskRunner> {
        let task = self.tasks.pop_front()?;
        let tx = self.task_tx.clone();
        self.tasks_outstanding += 1;
        Some(Box::new(move || {
            // The connection may be gone.
            let _ = tx.send(task());
        }))
    }

    fn task_pending(&self) -> bool {
        !self.tasks.is_empty() || self.tasks_outstanding > 0
    }

    fn check_task_thrown(&mut self) -> Result<(), Error> {
        while let Ok(result) = self.task_rx.try_recv() {
            self.tasks_outstanding = self.tasks_outstanding.saturating_sub(1);
            if let Err(e) = result {
                return Err(self.fail(e));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport)
            .field("is_client", &self.is_client)
            .field("state", &self.state)
            .field("version", &self.version)
            .field("handshaker", &self.handshaker)
            .field("close_reason", &self.close_reason)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::test_peers::{TestClient, TestServer};

    fn pair(transport: Transport, version: ProtocolVersion) -> (Connection, Connection) {
        pair_with(transport, TestClient::new(version), TestServer::new())
    }

    fn pair_with(transport: Transport, client: TestClient, server: TestServer) -> (Connection, Connection) {
        let config = Arc::new(Config::builder().rng_seed(11).build().unwrap());
        (
            Connection::new(config.clone(), transport, true, Box::new(client)),
            Connection::new(config, transport, false, Box::new(server)),
        )
    }

    /// Deliver everything `from` has to `to`. Returns the packet count.
    fn transfer(from: &mut Connection, to: &mut Connection, events: &mut Vec<Output>) -> usize {
        let mut n = 0;
        loop {
            match from.poll_output() {
                Output::Packet(p) => {
                    n += 1;
                    to.handle_packet(&p).unwrap();
                }
                Output::Idle | Output::NeedTask => return n,
                e => events.push(e),
            }
        }
    }

    fn run(client: &mut Connection, server: &mut Connection) -> (Vec<Output>, Vec<Output>) {
        let (mut client_events, mut server_events) = (vec![], vec![]);
        loop {
            let a = transfer(client, server, &mut client_events);
            let b = transfer(server, client, &mut server_events);
            if a == 0 && b == 0 {
                return (client_events, server_events);
            }
        }
    }

    fn packet(c: &mut Connection) -> Buf {
        match c.poll_output() {
            Output::Packet(p) => p,
            o => panic!("expected packet, got {:?}", o),
        }
    }

    fn connected(transport: Transport, version: ProtocolVersion) -> (Connection, Connection) {
        let (mut c, mut s) = pair(transport, version);
        c.begin_handshake().unwrap();
        let (ce, se) = run(&mut c, &mut s);
        assert_eq!(ce, vec![Output::Connected]);
        assert_eq!(se, vec![Output::Connected]);
        (c, s)
    }

    #[test]
    fn stream_handshake_then_data() {
        let (mut c, mut s) = connected(Transport::Stream, ProtocolVersion::TLS1_2);
        assert_eq!(c.state(), ConnectionState::Data);
        assert_eq!(s.version(), Some(ProtocolVersion::TLS1_2));
        assert!(!s.is_handshaking());

        c.write_app_data(b"ping").unwrap();
        s.write_app_data(b"pong").unwrap();
        let (ce, se) = run(&mut c, &mut s);
        assert_eq!(se, vec![Output::ApplicationData(Buf::from_slice(b"ping"))]);
        assert_eq!(ce, vec![Output::ApplicationData(Buf::from_slice(b"pong"))]);
    }

    #[test]
    fn packet_transport_handshake() {
        let (mut c, mut s) = connected(Transport::Packet, ProtocolVersion::TLS1_1);
        c.write_app_data(&[5; 3000]).unwrap();
        let (_, se) = run(&mut c, &mut s);
        assert_eq!(se, vec![Output::ApplicationData(Buf::from_slice(&[5; 3000]))]);
    }

    #[test]
    fn dtls_handshake_with_cookie() {
        let (mut c, mut s) = connected(Transport::Datagram, ProtocolVersion::DTLS1_2);
        assert_eq!(c.version(), Some(ProtocolVersion::DTLS1_2));

        c.write_app_data(b"over udp").unwrap();
        let (_, se) = run(&mut c, &mut s);
        assert_eq!(se, vec![Output::ApplicationData(Buf::from_slice(b"over udp"))]);
    }

    #[test]
    fn dtls_garbage_is_discarded() {
        let (_, mut s) = connected(Transport::Datagram, ProtocolVersion::DTLS1_2);
        assert_eq!(s.handle_packet(&[0xde, 0xad, 0xbe]).unwrap(), 3);
        assert_eq!(s.state(), ConnectionState::Data);
    }

    #[test]
    fn write_before_handshake_is_refused() {
        let (mut c, _) = pair(Transport::Stream, ProtocolVersion::TLS1_2);
        assert!(matches!(
            c.write_app_data(b"early"),
            Err(Error::IllegalState(_))
        ));
    }

    #[test]
    fn data_during_handshake_is_fatal() {
        let (_, mut s) = pair(Transport::Stream, ProtocolVersion::TLS1_2);
        let err = s.handle_packet(&[23, 3, 1, 0, 1, 0x41]).unwrap_err();
        assert_eq!(err.alert(), AlertDescription::UnexpectedMessage);
        assert_eq!(s.state(), ConnectionState::Closed);
        assert_eq!(&packet(&mut s)[..], &[21, 3, 1, 0, 2, 2, 10]);
        assert!(matches!(s.handle_packet(&[]), Err(Error::Closed)));
    }

    #[test]
    fn close_notify_both_ways() {
        let (mut c, mut s) = connected(Transport::Stream, ProtocolVersion::TLS1_2);
        c.close();
        assert_eq!(c.state(), ConnectionState::Closed);
        let (ce, se) = run(&mut c, &mut s);
        assert_eq!(se, vec![Output::Closed]);
        assert_eq!(ce, vec![Output::Closed]);
        assert_eq!(s.state(), ConnectionState::Closed);
        assert!(matches!(c.write_app_data(b"late"), Err(Error::Closed)));
    }

    #[test]
    fn close_notify_during_handshake_is_fatal() {
        let (mut c, mut s) = pair(Transport::Stream, ProtocolVersion::TLS1_2);
        c.begin_handshake().unwrap();
        s.handle_packet(&packet(&mut c)).unwrap();
        let err = s.handle_packet(&[21, 3, 1, 0, 2, 1, 0]).unwrap_err();
        assert_eq!(err.alert(), AlertDescription::UnexpectedMessage);
    }

    #[test]
    fn short_alert_is_illegal() {
        let (_, mut s) = pair(Transport::Stream, ProtocolVersion::TLS1_2);
        let err = s.handle_packet(&[21, 3, 1, 0, 1, 1]).unwrap_err();
        assert_eq!(err.alert(), AlertDescription::IllegalParameter);
    }

    #[test]
    fn peer_fatal_alert_closes_quietly() {
        let (_, mut s) = pair(Transport::Stream, ProtocolVersion::TLS1_2);
        let err = s.handle_packet(&[21, 3, 1, 0, 2, 2, 40]).unwrap_err();
        assert!(matches!(err, Error::PeerAlert(AlertDescription::HandshakeFailure)));
        assert_eq!(s.close_reason(), Some(AlertDescription::HandshakeFailure));
        assert_eq!(s.state(), ConnectionState::Closed);
        assert_eq!(s.poll_output(), Output::Idle);
    }

    #[test]
    fn tampered_record_after_handshake() {
        let (mut c, mut s) = connected(Transport::Stream, ProtocolVersion::TLS1_2);
        c.write_app_data(b"secret").unwrap();
        let mut p = packet(&mut c);
        let n = p.len();
        p[n - 1] ^= 0x80;
        let err = s.handle_packet(&p).unwrap_err();
        assert_eq!(err.alert(), AlertDescription::BadRecordMac);
    }

    #[test]
    fn tampered_finished_fails_the_handshake() {
        let (mut c, mut s) = pair(Transport::Stream, ProtocolVersion::TLS1_2);
        c.begin_handshake().unwrap();
        s.handle_packet(&packet(&mut c)).unwrap();
        c.handle_packet(&packet(&mut s)).unwrap();

        // ClientKeyExchange, ChangeCipherSpec and the encrypted Finished.
        let mut p = packet(&mut c);
        let n = p.len();
        p[n - 1] ^= 0x01;
        let err = s.handle_packet(&p).unwrap_err();
        assert_eq!(err.alert(), AlertDescription::HandshakeFailure);
    }

    #[test]
    fn server_requests_renegotiation() {
        let (mut c, mut s) = connected(Transport::Stream, ProtocolVersion::TLS1_2);
        s.begin_handshake().unwrap();
        assert_eq!(s.state(), ConnectionState::Renegotiate);

        let (ce, se) = run(&mut c, &mut s);
        assert_eq!(ce, vec![Output::Connected]);
        assert_eq!(se, vec![Output::Connected]);
        assert_eq!(c.state(), ConnectionState::Data);

        c.write_app_data(b"after").unwrap();
        let (_, se) = run(&mut c, &mut s);
        assert_eq!(se, vec![Output::ApplicationData(Buf::from_slice(b"after"))]);
    }

    #[test]
    fn insecure_renegotiation_is_refused() {
        let mut client = TestClient::new(ProtocolVersion::TLS1_2);
        client.secure_renegotiation = false;
        let mut server = TestServer::new();
        server.secure_renegotiation = false;

        let (mut c, mut s) = pair_with(Transport::Stream, client, server);
        c.begin_handshake().unwrap();
        run(&mut c, &mut s);

        assert!(matches!(s.begin_handshake(), Err(Error::IllegalState(_))));
        assert!(matches!(c.begin_handshake(), Err(Error::IllegalState(_))));
        assert_eq!(s.state(), ConnectionState::Data);
    }

    #[test]
    fn failed_delegated_task_is_fatal() {
        let mut server = TestServer::new();
        server.failing_task = true;
        let (mut c, mut s) = pair_with(
            Transport::Stream,
            TestClient::new(ProtocolVersion::TLS1_2),
            server,
        );

        c.begin_handshake().unwrap();
        s.handle_packet(&packet(&mut c)).unwrap();
        assert!(matches!(s.poll_output(), Output::Packet(_)));
        assert_eq!(s.poll_output(), Output::NeedTask);

        let task = s.delegated_task().unwrap();
        assert_eq!(s.handle_packet(&[22]).unwrap(), 0);
        task();

        let err = s.handle_packet(&[]).unwrap_err();
        assert_eq!(err.alert(), AlertDescription::InternalError);
        assert_eq!(s.state(), ConnectionState::Closed);
    }

    #[test]
    fn sslv2_hello_rejected_with_v2_error() {
        let (_, mut s) = pair(Transport::Stream, ProtocolVersion::TLS1_2);
        let body = [1, 3, 1, 0, 3, 0, 0, 0, 16, 0x00, 0x00, 0x2f];
        let mut hello = vec![0x80, (body.len() + 16) as u8];
        hello.extend_from_slice(&body);
        hello.extend_from_slice(&[0xab; 16]);

        let err = s.handle_packet(&hello).unwrap_err();
        assert_eq!(err.alert(), AlertDescription::UnexpectedMessage);
        assert!(packet(&mut s).starts_with(&NO_CIPHER_ERROR));
    }
}
