//! Network surface: party identifiers, communicators, the transport
//! interface, the wire payload format, and the error taxonomy.
//!
//! The core only consumes this interface; no transport is mandated. Network
//! routines never assert: every failure is a typed [`NetError`] the caller
//! must handle. An in-memory [`LocalExchange`] is provided so collective
//! protocols can be exercised in one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::core::limb::{Limb, LIMB_BITS};
use crate::shape::Shape;
use crate::tensor::{Element, Tensor};

/// Party identifier inside a communicator.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct PartyId(pub u32);

/// An ordered set of parties.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Communicator {
    parties: Vec<PartyId>,
}

impl Communicator {
    /// Construct from distinct parties; order is kept.
    pub fn new(parties: &[PartyId]) -> Self {
        let mut seen = std::collections::HashSet::new();
        for p in parties {
            assert!(seen.insert(*p), "duplicate party in communicator");
        }
        Self { parties: parties.to_vec() }
    }

    pub fn of(ids: &[u32]) -> Self {
        Self::new(&ids.iter().map(|&i| PartyId(i)).collect::<Vec<_>>())
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    pub fn contains(&self, party: PartyId) -> bool {
        self.parties.contains(&party)
    }

    pub fn index_of(&self, party: PartyId) -> Option<usize> {
        self.parties.iter().position(|p| *p == party)
    }

    pub fn parties(&self) -> &[PartyId] {
        &self.parties
    }
}

/// The full failure taxonomy of the messaging layer.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum NetError {
    InvalidHandle,
    InvalidPointer,
    InvalidSize,
    InvalidCommunicator,
    InvalidMetadata,
    VersionMismatch,
    FeatureMismatch,
    ChannelCouldNotReceive,
    ChannelCouldNotSend,
    ConnectionVersionMismatch,
    ConnectionTransportError,
    ConnectionClosed,
    ConnectionReset,
    ConnectionTimedOut,
    ConnectionLocallyClosed,
    ConnectionsExhausted,
    ApplicationClosed,
    StreamFinishedEarly,
    StreamReset,
    StreamStopped,
    StreamClosed,
    StreamIllegalOrderedRead,
    StreamRejected,
    StreamTooLong,
    InvalidEnumValue,
    SizeMismatch,
    TaskCancelled,
    TaskPanicked,
    SessionMismatch,
    SignatureVerification,
    UnknownSender,
    InconsistentCollective,
    /// Several failures surfaced from one collective call.
    Multiple(Vec<NetError>),
}

impl core::fmt::Display for NetError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NetError::InvalidHandle => write!(f, "invalid handle"),
            NetError::InvalidPointer => write!(f, "invalid pointer"),
            NetError::InvalidSize => write!(f, "invalid size"),
            NetError::InvalidCommunicator => write!(f, "invalid communicator"),
            NetError::InvalidMetadata => write!(f, "invalid metadata"),
            NetError::VersionMismatch => write!(f, "version mismatch"),
            NetError::FeatureMismatch => write!(f, "feature mismatch"),
            NetError::ChannelCouldNotReceive => write!(f, "cannot receive on channel"),
            NetError::ChannelCouldNotSend => write!(f, "cannot send on channel"),
            NetError::ConnectionVersionMismatch => write!(f, "connection version mismatch"),
            NetError::ConnectionTransportError => write!(f, "transport error"),
            NetError::ConnectionClosed => write!(f, "connection closed"),
            NetError::ConnectionReset => write!(f, "connection reset"),
            NetError::ConnectionTimedOut => write!(f, "connection timed out"),
            NetError::ConnectionLocallyClosed => write!(f, "connection locally closed"),
            NetError::ConnectionsExhausted => write!(f, "connection identifiers exhausted"),
            NetError::ApplicationClosed => write!(f, "application closed"),
            NetError::StreamFinishedEarly => write!(f, "stream finished early"),
            NetError::StreamReset => write!(f, "stream reset"),
            NetError::StreamStopped => write!(f, "stream stopped"),
            NetError::StreamClosed => write!(f, "stream closed"),
            NetError::StreamIllegalOrderedRead => write!(f, "stream illegal ordered read"),
            NetError::StreamRejected => write!(f, "stream rejected"),
            NetError::StreamTooLong => write!(f, "stream too long"),
            NetError::InvalidEnumValue => write!(f, "invalid enum value"),
            NetError::SizeMismatch => write!(f, "size mismatch"),
            NetError::TaskCancelled => write!(f, "task cancelled"),
            NetError::TaskPanicked => write!(f, "task panicked"),
            NetError::SessionMismatch => write!(f, "session mismatch"),
            NetError::SignatureVerification => write!(f, "signature verification failed"),
            NetError::UnknownSender => write!(f, "unknown sender"),
            NetError::InconsistentCollective => {
                write!(f, "inconsistent collective communication")
            }
            NetError::Multiple(errors) => write!(f, "multiple errors ({})", errors.len()),
        }
    }
}

impl std::error::Error for NetError {}

/// Traffic counters of a transport.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatistics {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rounds: u64,
}

/// Datatype tag of a wire message: the high bit is the sender's endianness
/// (1 = little-endian), the low seven bits the limb bit width.
pub const fn datatype_tag() -> u8 {
    let little_endian = cfg!(target_endian = "little") as u8;
    (little_endian << 7) | (LIMB_BITS as u8 & 0x7F)
}

/// Wire metadata: datatype tag plus the shape of the shipped tensor.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct WireMetadata {
    pub datatype: u8,
    pub limbs_per_element: u32,
    pub shape: Shape,
}

/// A tensor on the wire: metadata and the raw limb stream.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    pub metadata: WireMetadata,
    pub limbs: Vec<Limb>,
}

impl WireMessage {
    pub fn byte_len(&self) -> u64 {
        (self.limbs.len() * crate::core::limb::LIMB_BYTES) as u64
    }
}

/// Serialize a tensor for transport.
pub fn wire_encode<T: Element>(tensor: &Tensor<T>) -> WireMessage {
    let r = tensor.read();
    let mut limbs = vec![0 as Limb; tensor.len() * T::LIMBS];
    for i in 0..tensor.len() {
        r.get(i).to_limbs(&mut limbs[i * T::LIMBS..(i + 1) * T::LIMBS]);
    }
    WireMessage {
        metadata: WireMetadata {
            datatype: datatype_tag(),
            limbs_per_element: T::LIMBS as u32,
            shape: tensor.shape().clone(),
        },
        limbs,
    }
}

/// Validate and deserialize a received tensor. Endianness and limb-width
/// mismatches are rejected, as are inconsistent sizes.
pub fn wire_decode<T: Element>(message: &WireMessage) -> Result<Tensor<T>, NetError> {
    if message.metadata.datatype != datatype_tag() {
        return Err(NetError::InvalidMetadata);
    }
    if message.metadata.limbs_per_element as usize != T::LIMBS {
        return Err(NetError::InvalidMetadata);
    }
    let elements = message.metadata.shape.size();
    if message.limbs.len() != elements * T::LIMBS {
        return Err(NetError::SizeMismatch);
    }
    let tensor = Tensor::zeroed(message.metadata.shape.clone());
    {
        let w = tensor.write();
        for i in 0..elements {
            w.set(i, T::from_limbs(&message.limbs[i * T::LIMBS..(i + 1) * T::LIMBS]));
        }
    }
    Ok(tensor)
}

/// The transport interface the core consumes. Single-message collectives
/// plus multi-message variants that amortize one round over several
/// payloads.
pub trait Transport {
    /// As sender: deliver to every other party of the communicator. As
    /// receiver: obtain the sender's payload.
    fn broadcast(
        &mut self,
        communicator: &Communicator,
        sender: PartyId,
        payload: Option<WireMessage>,
    ) -> Result<WireMessage, NetError>;

    /// Gather all parties' payloads at `receiver`; others get an empty
    /// result vector.
    fn gather(
        &mut self,
        communicator: &Communicator,
        receiver: PartyId,
        payload: WireMessage,
    ) -> Result<Vec<WireMessage>, NetError>;

    /// Everyone contributes, everyone receives all payloads in party order.
    fn all_gather(
        &mut self,
        communicator: &Communicator,
        payload: WireMessage,
    ) -> Result<Vec<WireMessage>, NetError>;

    /// Personalized exchange: payload `i` goes to party `i`; the result
    /// holds one payload from each party.
    fn all_to_all(
        &mut self,
        communicator: &Communicator,
        payloads: Vec<WireMessage>,
    ) -> Result<Vec<WireMessage>, NetError>;

    /// Multi-message broadcast: all payloads ship in one round.
    fn broadcast_many(
        &mut self,
        communicator: &Communicator,
        sender: PartyId,
        payloads: Option<Vec<WireMessage>>,
    ) -> Result<Vec<WireMessage>, NetError>;

    /// Multi-message all-gather.
    fn all_gather_many(
        &mut self,
        communicator: &Communicator,
        payloads: Vec<WireMessage>,
    ) -> Result<Vec<Vec<WireMessage>>, NetError>;

    /// Multi-message gather: several payloads per party, one round.
    fn gather_many(
        &mut self,
        communicator: &Communicator,
        receiver: PartyId,
        payloads: Vec<WireMessage>,
    ) -> Result<Vec<Vec<WireMessage>>, NetError>;

    /// Multi-message personalized exchange: `payloads[i]` is the batch for
    /// party `i`.
    fn all_to_all_many(
        &mut self,
        communicator: &Communicator,
        payloads: Vec<Vec<WireMessage>>,
    ) -> Result<Vec<Vec<WireMessage>>, NetError>;

    fn statistics(&self) -> NetworkStatistics;
}

/// Shared in-process message board backing one [`LocalTransport`] per
/// party. Every endpoint numbers its collective calls; since all parties
/// execute the same sequence of collectives, equal sequence numbers line
/// up without shared coordination. Fetching blocks briefly until the peer
/// posts, then fails typed.
#[derive(Default)]
pub struct LocalExchange {
    slots: Mutex<HashMap<(u64, PartyId), Vec<WireMessage>>>,
}

impl LocalExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport endpoints for each party of the communicator.
    pub fn endpoints(self: &Arc<Self>, communicator: &Communicator) -> Vec<LocalTransport> {
        communicator
            .parties()
            .iter()
            .map(|&p| LocalTransport {
                exchange: Arc::clone(self),
                party: p,
                round: 0,
                timeout: std::time::Duration::from_millis(500),
                statistics: NetworkStatistics::default(),
            })
            .collect()
    }

    fn post(&self, round: u64, from: PartyId, payloads: Vec<WireMessage>) {
        self.slots.lock().expect("exchange poisoned").insert((round, from), payloads);
    }

    fn fetch(
        &self,
        round: u64,
        from: PartyId,
        timeout: std::time::Duration,
    ) -> Result<Vec<WireMessage>, NetError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(p) = self.slots.lock().expect("exchange poisoned").get(&(round, from)) {
                return Ok(p.clone());
            }
            if std::time::Instant::now() >= deadline {
                return Err(NetError::ChannelCouldNotReceive);
            }
            std::thread::yield_now();
        }
    }
}

/// One party's endpoint into a [`LocalExchange`].
pub struct LocalTransport {
    exchange: Arc<LocalExchange>,
    party: PartyId,
    round: u64,
    timeout: std::time::Duration,
    statistics: NetworkStatistics,
}

impl LocalTransport {
    pub fn party(&self) -> PartyId {
        self.party
    }

    fn validate(&self, communicator: &Communicator) -> Result<(), NetError> {
        if communicator.is_empty() || !communicator.contains(self.party) {
            return Err(NetError::InvalidCommunicator);
        }
        Ok(())
    }

    fn next_round(&mut self) -> u64 {
        self.round += 1;
        self.round
    }

    fn fetch(&self, round: u64, from: PartyId) -> Result<Vec<WireMessage>, NetError> {
        self.exchange.fetch(round, from, self.timeout)
    }

    fn count_sent(&mut self, payloads: &[WireMessage], receivers: usize) {
        self.statistics.rounds += 1;
        self.statistics.bytes_sent +=
            payloads.iter().map(WireMessage::byte_len).sum::<u64>() * receivers as u64;
    }

    fn count_received(&mut self, payloads: &[WireMessage]) {
        self.statistics.bytes_received += payloads.iter().map(WireMessage::byte_len).sum::<u64>();
    }
}

impl Transport for LocalTransport {
    fn broadcast(
        &mut self,
        communicator: &Communicator,
        sender: PartyId,
        payload: Option<WireMessage>,
    ) -> Result<WireMessage, NetError> {
        let mut result = self.broadcast_many(
            communicator,
            sender,
            payload.map(|p| vec![p]),
        )?;
        result.pop().ok_or(NetError::SizeMismatch)
    }

    fn gather(
        &mut self,
        communicator: &Communicator,
        receiver: PartyId,
        payload: WireMessage,
    ) -> Result<Vec<WireMessage>, NetError> {
        self.validate(communicator)?;
        if !communicator.contains(receiver) {
            return Err(NetError::UnknownSender);
        }
        let round = self.next_round();
        self.count_sent(std::slice::from_ref(&payload), 1);
        self.exchange.post(round, self.party, vec![payload]);
        if self.party != receiver {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(communicator.len());
        for &p in communicator.parties() {
            let mut payloads = self.fetch(round, p)?;
            let msg = payloads.pop().ok_or(NetError::SizeMismatch)?;
            self.count_received(std::slice::from_ref(&msg));
            out.push(msg);
        }
        Ok(out)
    }

    fn all_gather(
        &mut self,
        communicator: &Communicator,
        payload: WireMessage,
    ) -> Result<Vec<WireMessage>, NetError> {
        let per_party = self.all_gather_many(communicator, vec![payload])?;
        per_party
            .into_iter()
            .map(|mut v| v.pop().ok_or(NetError::SizeMismatch))
            .collect()
    }

    fn all_to_all(
        &mut self,
        communicator: &Communicator,
        payloads: Vec<WireMessage>,
    ) -> Result<Vec<WireMessage>, NetError> {
        self.validate(communicator)?;
        if payloads.len() != communicator.len() {
            return Err(NetError::InvalidSize);
        }
        let round = self.next_round();
        self.count_sent(&payloads, 1);
        self.exchange.post(round, self.party, payloads);
        let my_index = communicator.index_of(self.party).ok_or(NetError::UnknownSender)?;
        let mut out = Vec::with_capacity(communicator.len());
        for &p in communicator.parties() {
            let payloads = self.fetch(round, p)?;
            let msg = payloads.get(my_index).cloned().ok_or(NetError::SizeMismatch)?;
            self.count_received(std::slice::from_ref(&msg));
            out.push(msg);
        }
        Ok(out)
    }

    fn broadcast_many(
        &mut self,
        communicator: &Communicator,
        sender: PartyId,
        payloads: Option<Vec<WireMessage>>,
    ) -> Result<Vec<WireMessage>, NetError> {
        self.validate(communicator)?;
        if !communicator.contains(sender) {
            return Err(NetError::UnknownSender);
        }
        let round = self.next_round();
        if self.party == sender {
            let payloads = payloads.ok_or(NetError::InvalidPointer)?;
            self.count_sent(&payloads, communicator.len() - 1);
            self.exchange.post(round, sender, payloads.clone());
            Ok(payloads)
        } else {
            if payloads.is_some() {
                return Err(NetError::InconsistentCollective);
            }
            let payloads = self.fetch(round, sender)?;
            self.count_received(&payloads);
            self.statistics.rounds += 1;
            Ok(payloads)
        }
    }

    fn all_gather_many(
        &mut self,
        communicator: &Communicator,
        payloads: Vec<WireMessage>,
    ) -> Result<Vec<Vec<WireMessage>>, NetError> {
        self.validate(communicator)?;
        let round = self.next_round();
        self.count_sent(&payloads, communicator.len() - 1);
        self.exchange.post(round, self.party, payloads);
        let mut out = Vec::with_capacity(communicator.len());
        for &p in communicator.parties() {
            let received = self.fetch(round, p)?;
            self.count_received(&received);
            out.push(received);
        }
        Ok(out)
    }

    fn gather_many(
        &mut self,
        communicator: &Communicator,
        receiver: PartyId,
        payloads: Vec<WireMessage>,
    ) -> Result<Vec<Vec<WireMessage>>, NetError> {
        self.validate(communicator)?;
        if !communicator.contains(receiver) {
            return Err(NetError::UnknownSender);
        }
        let round = self.next_round();
        self.count_sent(&payloads, 1);
        self.exchange.post(round, self.party, payloads);
        if self.party != receiver {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(communicator.len());
        for &p in communicator.parties() {
            let received = self.fetch(round, p)?;
            self.count_received(&received);
            out.push(received);
        }
        Ok(out)
    }

    fn all_to_all_many(
        &mut self,
        communicator: &Communicator,
        payloads: Vec<Vec<WireMessage>>,
    ) -> Result<Vec<Vec<WireMessage>>, NetError> {
        self.validate(communicator)?;
        if payloads.len() != communicator.len() {
            return Err(NetError::InvalidSize);
        }
        // Positional batch splitting needs equal batch sizes.
        let per = payloads[0].len();
        if payloads.iter().any(|b| b.len() != per) {
            return Err(NetError::InvalidSize);
        }
        let round = self.next_round();
        let flattened: Vec<WireMessage> = payloads.into_iter().flatten().collect();
        self.count_sent(&flattened, 1);
        self.exchange.post(round, self.party, flattened);
        let my_index = communicator.index_of(self.party).ok_or(NetError::UnknownSender)?;
        let mut out = Vec::with_capacity(communicator.len());
        for &p in communicator.parties() {
            let all = self.fetch(round, p)?;
            if all.len() % communicator.len() != 0 {
                return Err(NetError::SizeMismatch);
            }
            let per = all.len() / communicator.len();
            let batch = all[my_index * per..(my_index + 1) * per].to_vec();
            self.count_received(&batch);
            out.push(batch);
        }
        Ok(out)
    }

    fn statistics(&self) -> NetworkStatistics {
        self.statistics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_modulus;
    use crate::ints::Mod;

    define_modulus!(struct Q17, 1, "17");

    fn tensor(vals: &[u64]) -> Tensor<Mod<Q17>> {
        Tensor::from_fn(Shape::new(&[vals.len()]), |i| Mod::from_u64(vals[i]))
    }

    #[test]
    fn wire_round_trip() {
        let t = tensor(&[1, 2, 3, 16]);
        let msg = wire_encode(&t);
        assert_eq!(msg.metadata.datatype & 0x7F, 64);
        let back: Tensor<Mod<Q17>> = wire_decode(&msg).unwrap();
        assert_eq!(back.to_vec(), t.to_vec());
    }

    #[test]
    fn wire_rejects_mismatches() {
        let t = tensor(&[1, 2]);
        let mut msg = wire_encode(&t);
        msg.metadata.datatype ^= 0x80; // flip endianness bit
        assert_eq!(
            wire_decode::<Mod<Q17>>(&msg).unwrap_err(),
            NetError::InvalidMetadata
        );

        let mut msg = wire_encode(&t);
        msg.metadata.limbs_per_element = 2;
        assert_eq!(
            wire_decode::<Mod<Q17>>(&msg).unwrap_err(),
            NetError::InvalidMetadata
        );

        let mut msg = wire_encode(&t);
        msg.limbs.pop();
        assert_eq!(wire_decode::<Mod<Q17>>(&msg).unwrap_err(), NetError::SizeMismatch);
    }

    #[test]
    fn broadcast_reaches_all_parties() {
        let comm = Communicator::of(&[0, 1, 2]);
        let exchange = LocalExchange::new();
        let mut endpoints = exchange.endpoints(&comm);
        let payload = wire_encode(&tensor(&[4, 5, 6]));

        let sent = endpoints[0]
            .broadcast(&comm, PartyId(0), Some(payload.clone()))
            .unwrap();
        assert_eq!(sent, payload);
        for ep in endpoints[1..].iter_mut() {
            let got = ep.broadcast(&comm, PartyId(0), None).unwrap();
            assert_eq!(got, payload);
        }
        assert_eq!(endpoints[0].statistics().bytes_sent, 2 * payload.byte_len());
        assert_eq!(endpoints[1].statistics().bytes_received, payload.byte_len());
    }

    #[test]
    fn all_gather_collects_in_party_order() {
        let comm = Communicator::of(&[3, 1, 7]);
        let exchange = LocalExchange::new();
        let endpoints = exchange.endpoints(&comm);
        let payloads: Vec<_> = (0..3).map(|i| wire_encode(&tensor(&[i]))).collect();

        std::thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .zip(payloads.clone())
                .map(|(mut ep, p)| {
                    let comm = comm.clone();
                    scope.spawn(move || ep.all_gather(&comm, p).unwrap())
                })
                .collect();
            for h in handles {
                assert_eq!(h.join().unwrap(), payloads);
            }
        });
    }

    #[test]
    fn all_to_all_routes_by_index() {
        let comm = Communicator::of(&[0, 1]);
        let exchange = LocalExchange::new();
        let mut endpoints = exchange.endpoints(&comm);
        let m = |v| wire_encode(&tensor(&[v]));

        let (r0, r1) = std::thread::scope(|scope| {
            let mut it = endpoints.drain(..);
            let mut e0 = it.next().unwrap();
            let mut e1 = it.next().unwrap();
            let comm0 = comm.clone();
            let comm1 = comm.clone();
            let h0 = scope.spawn(move || e0.all_to_all(&comm0, vec![m(1), m(2)]));
            let h1 = scope.spawn(move || e1.all_to_all(&comm1, vec![m(3), m(4)]));
            (h0.join().unwrap(), h1.join().unwrap())
        });
        assert_eq!(r0.unwrap(), vec![m(1), m(3)]);
        assert_eq!(r1.unwrap(), vec![m(2), m(4)]);
    }

    #[test]
    fn gather_collects_at_receiver_only() {
        let comm = Communicator::of(&[0, 1, 2]);
        let exchange = LocalExchange::new();
        let mut endpoints = exchange.endpoints(&comm);
        let payloads: Vec<_> = (10..13).map(|i| wire_encode(&tensor(&[i]))).collect();

        // Senders post first; the receiver (party 0) fetches afterwards.
        let r2 = endpoints[2].gather(&comm, PartyId(0), payloads[2].clone()).unwrap();
        let r1 = endpoints[1].gather(&comm, PartyId(0), payloads[1].clone()).unwrap();
        assert!(r2.is_empty() && r1.is_empty());
        let r0 = endpoints[0].gather(&comm, PartyId(0), payloads[0].clone()).unwrap();
        assert_eq!(r0, payloads);
    }

    #[test]
    fn errors_are_typed() {
        let comm = Communicator::of(&[0, 1]);
        let exchange = LocalExchange::new();
        let mut endpoints = exchange.endpoints(&comm);
        // Receiving before any send fails without panicking.
        let err = endpoints[1].broadcast(&comm, PartyId(0), None).unwrap_err();
        assert_eq!(err, NetError::ChannelCouldNotReceive);
        // Foreign communicator.
        let other = Communicator::of(&[5, 6]);
        let err = endpoints[0].broadcast(&other, PartyId(5), None).unwrap_err();
        assert_eq!(err, NetError::InvalidCommunicator);
        let display = format!("{}", NetError::Multiple(vec![NetError::StreamReset]));
        assert!(display.contains("multiple"));
    }
}
