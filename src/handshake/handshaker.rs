//! Glue between the record layer and a handshake protocol.
//!
//! The message contents (hellos, certificates, key exchange) belong to a
//! [`HandshakeConsumer`]. The [`Handshaker`] owns everything around it:
//! message framing and reassembly, the transcript hash, message ordering,
//! Finished verification and the keys waiting for the next cipher change.

use std::collections::VecDeque;
use std::sync::Arc;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::message::{frame_dtls, frame_tls, HandshakeAssembler, HandshakeMessage};
use super::state::{HandshakeStateManager, StateMessage};
use crate::buffer::Buf;
use crate::crypto::prf::finished_verify_data;
use crate::crypto::{HandshakeHash, HashAlgorithm, KeyMaterial, SuiteShape};
use crate::record::{Plaintext, RecordProtection};
use crate::types::{AlertDescription, HandshakeType, ProtocolVersion};
use crate::{Config, Error};

/// Work handed out to run away from the record path.
pub type DelegatedTask = Box<dyn FnOnce() -> Result<(), Error> + Send + 'static>;

/// The message-level half of a handshake, client or server.
pub trait HandshakeConsumer: Send {
    /// Send the opening message: ClientHello for a client, HelloRequest
    /// for a server asking to renegotiate.
    fn kickstart(&mut self, ctx: &mut HandshakeContext) -> Result<(), Error>;

    /// Absorb one peer message and report what ordering depends on.
    ///
    /// Runs after the ordering check and before the message is known to
    /// the state manager, so it must not send anything.
    fn consume(
        &mut self,
        message: &HandshakeMessage,
        ctx: &mut HandshakeContext,
    ) -> Result<StateMessage, Error>;

    /// Send what the last consumed message calls for.
    fn produce(&mut self, _after: HandshakeType, _ctx: &mut HandshakeContext) -> Result<(), Error> {
        Ok(())
    }

    /// A warning alert from the peer, e.g. `no_certificate`.
    fn handle_warning(&mut self, _description: AlertDescription) -> Result<(), Error> {
        Ok(())
    }
}

/// What the handshake wants written, in order.
#[derive(Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A whole handshake message with its header.
    Message(Buf),
    /// Send ChangeCipherSpec and install the pending write keys.
    ChangeCipherSpec,
}

struct PendingKeys {
    prf_hash: HashAlgorithm,
    master_secret: Zeroizing<Vec<u8>>,
}

/// Handshake state that a [`HandshakeConsumer`] works against.
pub struct HandshakeContext {
    config: Arc<Config>,
    is_client: bool,
    is_dtls: bool,
    version: Option<ProtocolVersion>,
    hash: HandshakeHash,
    state: HandshakeStateManager,
    outbox: VecDeque<Outbound>,
    /// DTLS message_seq of the next message we send.
    send_seq: u16,
    keys: Option<PendingKeys>,
    read_pending: Option<RecordProtection>,
    write_pending: Option<RecordProtection>,
    tasks: Vec<DelegatedTask>,
    secure_renegotiation: bool,
    local_finished: bool,
}

impl HandshakeContext {
    fn new(config: Arc<Config>, is_client: bool, is_dtls: bool) -> Self {
        HandshakeContext {
            config,
            is_client,
            is_dtls,
            version: None,
            hash: HandshakeHash::new(),
            state: HandshakeStateManager::new(is_dtls),
            outbox: VecDeque::new(),
            send_seq: 0,
            keys: None,
            read_pending: None,
            write_pending: None,
            tasks: Vec::new(),
            secure_renegotiation: false,
            local_finished: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_client(&self) -> bool {
        self.is_client
    }

    pub fn is_dtls(&self) -> bool {
        self.is_dtls
    }

    /// Negotiated version, once a hello settled it.
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    pub fn transcript(&self) -> &HandshakeHash {
        &self.hash
    }

    /// The hellos agreed on `version`. Locks the transcript digests.
    pub fn negotiated(&mut self, version: ProtocolVersion) {
        debug!("Negotiated {}", version);
        self.version = Some(version);
        self.hash.protocol_determined(version);
    }

    pub fn set_secure_renegotiation(&mut self, secure: bool) {
        self.secure_renegotiation = secure;
    }

    /// Whether the connection so far runs with RFC 5746 renegotiation.
    pub fn secure_renegotiation(&self) -> bool {
        self.secure_renegotiation
    }

    /// Frame, hash and queue one message of ours.
    pub fn send(&mut self, message: StateMessage, body: &[u8]) -> Result<(), Error> {
        let t = message.handshake_type();
        self.state.check(t)?;
        self.state.update(message)?;

        let raw = if self.is_dtls {
            let seq = self.send_seq;
            self.send_seq = self.send_seq.wrapping_add(1);
            frame_dtls(t, seq, body)
        } else {
            frame_tls(t, body)
        };

        if t == HandshakeType::HelloVerifyRequest {
            // The cookie exchange is not part of the transcript.
            self.hash.reset()?;
        } else if !t.excluded_from_hash() {
            self.hash.update(&raw);
        }

        trace!("Produced {} ({} bytes)", t, raw.len());
        self.outbox.push_back(Outbound::Message(raw));
        Ok(())
    }

    /// Expand the master secret into both directions' pending keys.
    pub fn derive_keys(
        &mut self,
        shape: SuiteShape,
        prf_hash: HashAlgorithm,
        master_secret: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) -> Result<(), Error> {
        let version = self
            .version
            .ok_or(Error::IllegalState("keys derived before version negotiated"))?;

        let keys = KeyMaterial::derive(
            version,
            shape,
            prf_hash,
            master_secret,
            client_random,
            server_random,
        )?;

        let (auth, cipher) = keys.read_state(self.is_client)?;
        self.read_pending = Some(RecordProtection::new(auth, cipher));
        let (auth, cipher) = keys.write_state(self.is_client)?;
        self.write_pending = Some(RecordProtection::new(auth, cipher));

        if version.use_tls12_plus() {
            self.hash.set_finished_alg(prf_hash)?;
        }
        self.keys = Some(PendingKeys {
            prf_hash,
            master_secret: Zeroizing::new(master_secret.to_vec()),
        });

        debug!("Derived pending keys for {}", version);
        Ok(())
    }

    fn verify_data(&self, sender_is_client: bool) -> Result<Vec<u8>, Error> {
        let version = self
            .version
            .ok_or(Error::IllegalState("Finished before version negotiated"))?;
        let keys = self
            .keys
            .as_ref()
            .ok_or(Error::IllegalState("Finished before keys derived"))?;
        finished_verify_data(
            version,
            keys.prf_hash,
            &keys.master_secret,
            &self.hash,
            sender_is_client,
        )
    }

    /// ChangeCipherSpec followed by our Finished.
    pub fn send_finished(&mut self) -> Result<(), Error> {
        if self.write_pending.is_none() {
            return Err(Error::IllegalState("Finished without pending write keys"));
        }
        self.state.change_cipher_spec(false, self.is_client)?;
        self.outbox.push_back(Outbound::ChangeCipherSpec);

        let verify_data = self.verify_data(self.is_client)?;
        self.send(StateMessage::Finished, &verify_data)?;
        self.local_finished = true;
        Ok(())
    }

    /// Queue work to be run off the record path.
    pub fn delegate(&mut self, task: impl FnOnce() -> Result<(), Error> + Send + 'static) {
        self.tasks.push(Box::new(task));
    }
}

pub struct Handshaker {
    consumer: Box<dyn HandshakeConsumer>,
    ctx: HandshakeContext,
    assembler: HandshakeAssembler,
    activated: bool,
    peer_finished: bool,
}

impl Handshaker {
    pub fn new(
        config: Arc<Config>,
        consumer: Box<dyn HandshakeConsumer>,
        is_client: bool,
        is_dtls: bool,
    ) -> Self {
        Handshaker {
            consumer,
            ctx: HandshakeContext::new(config, is_client, is_dtls),
            assembler: HandshakeAssembler::new(),
            activated: false,
            peer_finished: false,
        }
    }

    pub fn is_client(&self) -> bool {
        self.ctx.is_client
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.ctx.version
    }

    pub fn secure_renegotiation(&self) -> bool {
        self.ctx.secure_renegotiation
    }

    /// Carry the previous handshake's RFC 5746 outcome into a renegotiation.
    pub fn set_secure_renegotiation(&mut self, secure: bool) {
        self.ctx.secure_renegotiation = secure;
    }

    /// Mark the handshake as started. A client also sends its hello.
    pub fn activate(&mut self) -> Result<(), Error> {
        if self.activated {
            return Ok(());
        }
        self.activated = true;
        debug!(
            "Activate {} handshaker",
            if self.ctx.is_client { "client" } else { "server" }
        );
        if self.ctx.is_client {
            self.kickstart()?;
        }
        Ok(())
    }

    /// Send the opening message.
    pub fn kickstart(&mut self) -> Result<(), Error> {
        self.consumer.kickstart(&mut self.ctx)
    }

    /// Feed one handshake record.
    pub fn process_record(&mut self, record: &Plaintext, expecting_finished: bool) -> Result<(), Error> {
        if let Some(v2) = &record.v2_hello {
            let message = HandshakeMessage::from_tls(record.fragment.clone())?;
            return self.process_message(message, Some(v2), expecting_finished);
        }

        if self.ctx.is_dtls {
            let message = HandshakeMessage::from_dtls(record.fragment.clone())?;
            return self.process_message(message, None, expecting_finished);
        }

        self.assembler.push(&record.fragment);
        while let Some(message) = self.assembler.next_message()? {
            self.process_message(message, None, expecting_finished)?;
        }
        Ok(())
    }

    fn process_message(
        &mut self,
        message: HandshakeMessage,
        hash_bytes: Option<&Buf>,
        expecting_finished: bool,
    ) -> Result<(), Error> {
        let t = message.msg_type;
        trace!("Consume {} ({} bytes)", t, message.body().len());

        if expecting_finished && t != HandshakeType::Finished {
            return Err(Error::fatal(
                AlertDescription::UnexpectedMessage,
                format!("{} while expecting Finished", t),
            ));
        }

        if t == HandshakeType::HelloRequest && self.ctx.is_client && !self.ctx.state.is_empty() {
            debug!("Ignore HelloRequest during handshake");
            return Ok(());
        }

        self.ctx.state.check(t)?;

        let bytes: &[u8] = match hash_bytes {
            Some(b) => b,
            None => &message.raw,
        };

        let mut expected_finished = None;
        if t == HandshakeType::HelloVerifyRequest {
            self.ctx.hash.reset()?;
        } else if t.defers_hash() {
            if t == HandshakeType::Finished {
                expected_finished = Some(self.ctx.verify_data(!self.ctx.is_client)?);
            }
            self.ctx.hash.reserve(bytes);
        } else if !t.excluded_from_hash() {
            self.ctx.hash.update(bytes);
        }

        if let Some(expected) = expected_finished {
            let ok: bool = expected.ct_eq(message.body()).into();
            if !ok {
                return Err(Error::fatal(
                    AlertDescription::DecryptError,
                    "Incorrect verify data in Finished",
                ));
            }
            debug!("Peer Finished verified");
            self.peer_finished = true;
        }

        let facts = self.consumer.consume(&message, &mut self.ctx)?;
        if facts.handshake_type() != t {
            return Err(Error::IllegalState("consumer reported another message type"));
        }
        self.ctx.state.update(facts)?;
        self.ctx.hash.reload();

        self.consumer.produce(t, &mut self.ctx)
    }

    /// Validate the peer's ChangeCipherSpec and hand out the read keys.
    pub fn receive_change_cipher_spec(&mut self) -> Result<RecordProtection, Error> {
        self.ctx.state.change_cipher_spec(true, self.ctx.is_client)?;
        if !self.assembler.is_empty() {
            return Err(Error::fatal(
                AlertDescription::UnexpectedMessage,
                "ChangeCipherSpec inside a handshake message",
            ));
        }
        self.ctx.read_pending.take().ok_or_else(|| {
            Error::fatal(
                AlertDescription::UnexpectedMessage,
                "ChangeCipherSpec before keys were established",
            )
        })
    }

    /// Pending write keys, taken at our ChangeCipherSpec.
    pub fn write_protection(&mut self) -> Result<RecordProtection, Error> {
        self.ctx
            .write_pending
            .take()
            .ok_or(Error::IllegalState("no pending write keys"))
    }

    pub fn take_outbound(&mut self) -> Option<Outbound> {
        self.ctx.outbox.pop_front()
    }

    pub fn take_delegated_tasks(&mut self) -> Vec<DelegatedTask> {
        std::mem::take(&mut self.ctx.tasks)
    }

    pub fn handle_warning(&mut self, description: AlertDescription) -> Result<(), Error> {
        self.consumer.handle_warning(description)
    }

    /// DTLS: the next peer flight is ChangeCipherSpec and Finished.
    pub fn expects_peer_change_cipher_spec(&self) -> bool {
        self.ctx
            .state
            .expects_peer_change_cipher_spec(self.ctx.is_client)
    }

    /// Both Finished messages are through and nothing else is expected.
    pub fn is_finished(&self) -> bool {
        self.peer_finished && self.ctx.local_finished && self.ctx.state.is_empty()
    }

    /// Give the consumer back, e.g. to run a renegotiation with it.
    pub fn into_consumer(self) -> Box<dyn HandshakeConsumer> {
        self.consumer
    }
}

impl std::fmt::Debug for Handshaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshaker")
            .field("is_client", &self.ctx.is_client)
            .field("is_dtls", &self.ctx.is_dtls)
            .field("version", &self.ctx.version)
            .field("activated", &self.activated)
            .field("peer_finished", &self.peer_finished)
            .field("local_finished", &self.ctx.local_finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::test_peers::{TestClient, TestServer};
    use crate::types::{ContentType, Sequence};

    fn client() -> Handshaker {
        let peer = TestClient::new(ProtocolVersion::TLS1_2);
        Handshaker::new(config(), Box::new(peer), true, false)
    }

    fn server() -> Handshaker {
        Handshaker::new(config(), Box::new(TestServer::new()), false, false)
    }

    fn config() -> Arc<Config> {
        Arc::new(Config::default())
    }

    fn record(fragment: &[u8]) -> Plaintext {
        Plaintext::new(
            ContentType::Handshake,
            ProtocolVersion::TLS1_2,
            Sequence::default(),
            Buf::from_slice(fragment),
        )
    }

    /// Move messages across until one side wants a cipher change.
    fn pump(from: &mut Handshaker, to: &mut Handshaker) {
        while let Some(out) = from.take_outbound() {
            match out {
                Outbound::Message(m) => to.process_record(&record(&m), false).unwrap(),
                Outbound::ChangeCipherSpec => {
                    from.write_protection().unwrap();
                    to.receive_change_cipher_spec().unwrap();
                }
            }
        }
    }

    #[test]
    fn handshake_runs_to_finished() {
        let mut client = client();
        let mut server = server();

        client.activate().unwrap();
        pump(&mut client, &mut server);
        pump(&mut server, &mut client);
        pump(&mut client, &mut server);
        assert!(server.is_finished());
        assert!(!client.is_finished());
        pump(&mut server, &mut client);

        assert!(client.is_finished());
        assert!(server.is_finished());
        assert_eq!(client.version(), Some(ProtocolVersion::TLS1_2));
    }

    #[test]
    fn tampered_finished_is_rejected() {
        let mut client = client();
        let mut server = server();

        client.activate().unwrap();
        pump(&mut client, &mut server);
        pump(&mut server, &mut client);

        let mut last = None;
        while let Some(out) = client.take_outbound() {
            match out {
                Outbound::Message(m) if m[0] == 20 => last = Some(m),
                Outbound::Message(m) => server.process_record(&record(&m), false).unwrap(),
                Outbound::ChangeCipherSpec => {
                    server.receive_change_cipher_spec().unwrap();
                }
            }
        }
        let mut fin = last.unwrap();
        let n = fin.len();
        fin[n - 1] ^= 1;
        let err = server.process_record(&record(&fin), true).unwrap_err();
        assert_eq!(err.alert(), AlertDescription::DecryptError);
    }

    #[test]
    fn messages_may_span_and_share_records() {
        let mut client = client();
        let mut server = server();
        client.activate().unwrap();
        pump(&mut client, &mut server);

        let mut wire = vec![];
        while let Some(Outbound::Message(m)) = server.take_outbound() {
            wire.extend_from_slice(&m);
        }
        // ServerHello split in two, its tail sharing a record with ServerHelloDone.
        client.process_record(&record(&wire[..10]), false).unwrap();
        client.process_record(&record(&wire[10..]), false).unwrap();
        assert!(matches!(client.take_outbound(), Some(Outbound::Message(m)) if m[0] == 16));
    }

    #[test]
    fn out_of_order_message_is_a_violation() {
        let mut server = server();
        let cke = frame_tls(HandshakeType::ClientKeyExchange, &[0; 4]);
        assert!(matches!(
            server.process_record(&record(&cke), false),
            Err(Error::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn early_change_cipher_spec_is_fatal() {
        let mut client = client();
        client.activate().unwrap();
        assert!(client.receive_change_cipher_spec().is_err());
    }
}
