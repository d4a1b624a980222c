//! Role sessions driven over the in-memory transport

use std::time::Duration;

use anyhow::{Context, Result};
use rtc_signaling::config::Timeouts;
use rtc_signaling::signaling::event::{
    ACK_ANSWER, INITIATOR_TOKEN, NEW_INITIATOR, NEW_RECEIVER, REQ_DISCONNECT, SEND_ANSWER, SEND_OFFER,
};
use rtc_signaling::signaling::{Awaiting, DecodeError};
use rtc_signaling::transport::{
    memory, Connection, MemoryConnector, MemoryPeer, Transport, TransportError, TransportEvent,
};
use rtc_signaling::{
    Initiator, InitiatorPhase, Receiver, ReceiverPhase, SessionDescription, SignalingError, Token,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq)]
enum Fired {
    Token(Token),
    Offer(SessionDescription),
    Answer(SessionDescription),
    Error(SignalingError),
}

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn next_fired(fired: &mut mpsc::UnboundedReceiver<Fired>) -> Result<Option<Fired>> {
    timeout(WAIT, fired.recv()).await.context("no callback fired")
}

async fn expect_emit(relay: &mut MemoryPeer, name: &str) -> Result<Vec<Value>> {
    let (emitted, args) = timeout(WAIT, relay.next_emitted())
        .await
        .context("nothing emitted")?
        .context("transport dropped")?;
    assert_eq!(emitted, name);
    Ok(args)
}

/// Memory transport whose emits of one event name fail.
struct RefusingTransport {
    inner: Box<dyn Transport>,
    refused: &'static str,
}

impl Transport for RefusingTransport {
    fn emit(&self, name: &str, args: Vec<Value>) -> Result<(), TransportError> {
        if name == self.refused {
            return Err(TransportError::Closed);
        }
        self.inner.emit(name, args)
    }

    fn close(&self) {
        self.inner.close();
    }
}

fn refusing(refused: &'static str) -> (MemoryConnector, MemoryPeer) {
    let (Connection { transport, events }, relay) = memory::pair();
    let connection = Connection {
        transport: Box::new(RefusingTransport {
            inner: transport,
            refused,
        }),
        events,
    };
    (MemoryConnector::new(connection), relay)
}

async fn start_initiator(
    offer: SessionDescription,
    timeouts: Timeouts,
) -> Result<(Initiator, MemoryPeer, mpsc::UnboundedReceiver<Fired>)> {
    start_initiator_on(MemoryConnector::pair(), offer, timeouts).await
}

async fn start_initiator_on(
    (connector, relay): (MemoryConnector, MemoryPeer),
    offer: SessionDescription,
    timeouts: Timeouts,
) -> Result<(Initiator, MemoryPeer, mpsc::UnboundedReceiver<Fired>)> {
    let (tx, fired) = mpsc::unbounded_channel();
    let (on_answer, on_error) = (tx.clone(), tx.clone());

    let initiator = Initiator::builder("memory://relay", offer)
        .timeouts(timeouts)
        .on_token(move |token| {
            let _ = tx.send(Fired::Token(token));
        })
        .on_answer(move |answer| {
            let _ = on_answer.send(Fired::Answer(answer));
        })
        .on_error(move |e| {
            let _ = on_error.send(Fired::Error(e));
        })
        .connect_with(&connector)
        .await?;
    Ok((initiator, relay, fired))
}

async fn start_receiver(
    token: &str,
    timeouts: Timeouts,
) -> Result<(Receiver, MemoryPeer, mpsc::UnboundedReceiver<Fired>)> {
    start_receiver_on(MemoryConnector::pair(), token, timeouts).await
}

async fn start_receiver_on(
    (connector, relay): (MemoryConnector, MemoryPeer),
    token: &str,
    timeouts: Timeouts,
) -> Result<(Receiver, MemoryPeer, mpsc::UnboundedReceiver<Fired>)> {
    let (tx, fired) = mpsc::unbounded_channel();
    let on_error = tx.clone();

    let receiver = Receiver::builder("memory://relay", token)
        .timeouts(timeouts)
        .on_offer(move |offer| {
            let _ = tx.send(Fired::Offer(offer));
        })
        .on_error(move |e| {
            let _ = on_error.send(Fired::Error(e));
        })
        .connect_with(&connector)
        .await?;
    Ok((receiver, relay, fired))
}

/// Initiator that has announced and sent its offer to a joined receiver.
async fn initiator_with_offer_sent() -> Result<(Initiator, MemoryPeer, mpsc::UnboundedReceiver<Fired>)> {
    let (initiator, mut relay, mut fired) =
        start_initiator(SessionDescription::offer("v=0 offer"), Timeouts::default()).await?;
    relay.deliver(TransportEvent::Connected);
    expect_emit(&mut relay, NEW_INITIATOR).await?;
    relay.deliver_event(INITIATOR_TOKEN, vec![json!("tok123")]);
    assert_eq!(next_fired(&mut fired).await?, Some(Fired::Token(Token::new("tok123"))));
    relay.deliver_event(NEW_RECEIVER, vec![]);
    expect_emit(&mut relay, SEND_OFFER).await?;
    Ok((initiator, relay, fired))
}

#[tokio::test]
async fn test_initiator_happy_path() -> Result<()> {
    init();
    let (initiator, mut relay, mut fired) =
        start_initiator(SessionDescription::offer("v=0 offer"), Timeouts::default()).await?;
    assert_eq!(initiator.phase(), InitiatorPhase::Connecting);

    relay.deliver(TransportEvent::Connected);
    assert!(expect_emit(&mut relay, NEW_INITIATOR).await?.is_empty());

    relay.deliver_event(INITIATOR_TOKEN, vec![json!("tok123")]);
    assert_eq!(next_fired(&mut fired).await?, Some(Fired::Token(Token::new("tok123"))));
    assert_eq!(initiator.token(), Some(Token::new("tok123")));

    relay.deliver_event(NEW_RECEIVER, vec![]);
    let args = expect_emit(&mut relay, SEND_OFFER).await?;
    assert_eq!(args, vec![json!({"type": "offer", "sdp": "v=0 offer"})]);

    relay.deliver_event(SEND_ANSWER, vec![json!({"type": "answer", "sdp": "v=0 answer"})]);
    assert!(expect_emit(&mut relay, ACK_ANSWER).await?.is_empty());
    assert_eq!(
        next_fired(&mut fired).await?,
        Some(Fired::Answer(SessionDescription::answer("v=0 answer")))
    );

    timeout(WAIT, initiator.finished()).await??;
    assert_eq!(initiator.phase(), InitiatorPhase::Completed);
    assert_eq!(relay.close_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_receiver_happy_path() -> Result<()> {
    init();
    let (receiver, mut relay, mut fired) = start_receiver("tok123", Timeouts::default()).await?;

    relay.deliver(TransportEvent::Connected);
    assert_eq!(expect_emit(&mut relay, NEW_RECEIVER).await?, vec![json!("tok123")]);

    relay.deliver_event(SEND_OFFER, vec![json!({"type": "offer", "sdp": "v=0 offer"})]);
    assert_eq!(
        next_fired(&mut fired).await?,
        Some(Fired::Offer(SessionDescription::offer("v=0 offer")))
    );
    assert_eq!(receiver.phase(), ReceiverPhase::OfferReceived);

    receiver.send_answer(SessionDescription::answer("v=0 answer"))?;
    let args = expect_emit(&mut relay, SEND_ANSWER).await?;
    assert_eq!(args, vec![json!({"type": "answer", "sdp": "v=0 answer"})]);

    relay.deliver_event(ACK_ANSWER, vec![]);
    timeout(WAIT, receiver.finished()).await??;
    assert_eq!(receiver.phase(), ReceiverPhase::Completed);
    assert_eq!(relay.close_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_receiver_rejected_by_relay() -> Result<()> {
    init();
    let (receiver, mut relay, mut fired) = start_receiver("stale", Timeouts::default()).await?;

    relay.deliver(TransportEvent::Connected);
    expect_emit(&mut relay, NEW_RECEIVER).await?;

    relay.deliver_event(REQ_DISCONNECT, vec![json!("unknown or expired token")]);
    assert_eq!(
        next_fired(&mut fired).await?,
        Some(Fired::Error(SignalingError::Rejected("unknown or expired token".into())))
    );

    // Nothing after the rejection reaches the callbacks.
    relay.deliver_event(SEND_OFFER, vec![json!({"type": "offer", "sdp": "v=0"})]);
    assert_eq!(next_fired(&mut fired).await?, None);

    assert_eq!(
        receiver.finished().await,
        Err(SignalingError::Rejected("unknown or expired token".into()))
    );
    assert_eq!(relay.close_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_no_answer_before_offer() -> Result<()> {
    init();
    let (receiver, mut relay, _fired) = start_receiver("tok123", Timeouts::default()).await?;

    let err = receiver
        .send_answer(SessionDescription::answer("too early"))
        .unwrap_err();
    assert!(matches!(err, SignalingError::InvalidState { .. }));

    relay.deliver(TransportEvent::Connected);
    expect_emit(&mut relay, NEW_RECEIVER).await?;

    let err = receiver
        .send_answer(SessionDescription::answer("still early"))
        .unwrap_err();
    assert!(matches!(err, SignalingError::InvalidState { .. }));
    assert_eq!(relay.try_next_emitted(), None);
    assert_eq!(receiver.phase(), ReceiverPhase::AwaitingOffer);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_closes_once() -> Result<()> {
    init();
    let (initiator, mut relay, _fired) =
        start_initiator(SessionDescription::offer("v=0"), Timeouts::default()).await?;
    relay.deliver(TransportEvent::Connected);
    expect_emit(&mut relay, NEW_INITIATOR).await?;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let handle = initiator.clone();
        tasks.push(tokio::spawn(async move { handle.disconnect() }));
    }
    for task in tasks {
        task.await?;
    }
    initiator.disconnect();

    assert_eq!(relay.close_count(), 1);
    assert_eq!(initiator.phase(), InitiatorPhase::Closed);
    assert_eq!(initiator.finished().await, Err(SignalingError::Closed));
    Ok(())
}

#[tokio::test]
async fn test_disconnect_after_completion_is_noop() -> Result<()> {
    init();
    let (initiator, mut relay, _fired) = initiator_with_offer_sent().await?;
    relay.deliver_event(SEND_ANSWER, vec![json!({"type": "answer", "sdp": "v=0"})]);
    expect_emit(&mut relay, ACK_ANSWER).await?;
    timeout(WAIT, initiator.finished()).await??;

    initiator.disconnect();
    initiator.disconnect();
    assert_eq!(relay.close_count(), 1);
    assert_eq!(initiator.phase(), InitiatorPhase::Completed);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_before_connected() -> Result<()> {
    init();
    let (receiver, relay, _fired) = start_receiver("tok123", Timeouts::default()).await?;
    receiver.disconnect();

    // The connect notification arrives too late to join.
    relay.deliver(TransportEvent::Connected);
    assert_eq!(receiver.finished().await, Err(SignalingError::Closed));
    assert_eq!(relay.close_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_waiting_for_offer_times_out() -> Result<()> {
    init();
    let timeouts = Timeouts {
        offer_ms: Some(50),
        ..Timeouts::default()
    };
    let (receiver, mut relay, mut fired) = start_receiver("tok123", timeouts).await?;
    relay.deliver(TransportEvent::Connected);
    expect_emit(&mut relay, NEW_RECEIVER).await?;

    assert_eq!(
        next_fired(&mut fired).await?,
        Some(Fired::Error(SignalingError::TimedOut(Awaiting::Offer)))
    );
    assert_eq!(
        receiver.phase(),
        ReceiverPhase::Failed(SignalingError::TimedOut(Awaiting::Offer))
    );
    assert_eq!(relay.close_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_transport_loss_is_reported() -> Result<()> {
    init();
    let (initiator, mut relay, mut fired) = initiator_with_offer_sent().await?;

    relay.deliver(TransportEvent::Disconnected("connection reset".into()));
    match next_fired(&mut fired).await? {
        Some(Fired::Error(SignalingError::Transport(message))) => {
            assert!(message.contains("connection reset"))
        }
        other => panic!("expected a transport error, got {:?}", other),
    }
    assert!(matches!(
        initiator.finished().await,
        Err(SignalingError::Transport(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_malformed_answer_fails_session() -> Result<()> {
    init();
    let (initiator, mut relay, mut fired) = initiator_with_offer_sent().await?;

    relay.deliver_event(SEND_ANSWER, vec![json!({"sdp": "v=0"})]);
    assert_eq!(
        next_fired(&mut fired).await?,
        Some(Fired::Error(SignalingError::Decode(DecodeError::MissingType)))
    );
    assert!(matches!(initiator.phase(), InitiatorPhase::Failed(_)));
    assert_eq!(relay.try_next_emitted(), None);
    assert_eq!(relay.close_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_second_receiver_does_not_resend_offer() -> Result<()> {
    init();
    let (initiator, mut relay, _fired) = initiator_with_offer_sent().await?;

    relay.deliver_event(NEW_RECEIVER, vec![]);
    relay.deliver_event(SEND_ANSWER, vec![json!({"type": "answer", "sdp": "v=0"})]);
    expect_emit(&mut relay, ACK_ANSWER).await?;
    timeout(WAIT, initiator.finished()).await??;
    Ok(())
}

#[tokio::test]
async fn test_waiting_for_receiver_times_out() -> Result<()> {
    init();
    let timeouts = Timeouts {
        receiver_ms: Some(50),
        ..Timeouts::default()
    };
    let (initiator, mut relay, mut fired) =
        start_initiator(SessionDescription::offer("v=0"), timeouts).await?;
    relay.deliver(TransportEvent::Connected);
    expect_emit(&mut relay, NEW_INITIATOR).await?;
    relay.deliver_event(INITIATOR_TOKEN, vec![json!("tok123")]);
    assert_eq!(next_fired(&mut fired).await?, Some(Fired::Token(Token::new("tok123"))));

    assert_eq!(
        next_fired(&mut fired).await?,
        Some(Fired::Error(SignalingError::TimedOut(Awaiting::Receiver)))
    );
    assert_eq!(
        initiator.phase(),
        InitiatorPhase::Failed(SignalingError::TimedOut(Awaiting::Receiver))
    );
    assert_eq!(
        initiator.finished().await,
        Err(SignalingError::TimedOut(Awaiting::Receiver))
    );
    assert_eq!(relay.close_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unsent_ack_is_reported() -> Result<()> {
    init();
    let (initiator, mut relay, mut fired) = start_initiator_on(
        refusing(ACK_ANSWER),
        SessionDescription::offer("v=0 offer"),
        Timeouts::default(),
    )
    .await?;
    relay.deliver(TransportEvent::Connected);
    expect_emit(&mut relay, NEW_INITIATOR).await?;
    relay.deliver_event(INITIATOR_TOKEN, vec![json!("tok123")]);
    assert_eq!(next_fired(&mut fired).await?, Some(Fired::Token(Token::new("tok123"))));
    relay.deliver_event(NEW_RECEIVER, vec![]);
    expect_emit(&mut relay, SEND_OFFER).await?;

    relay.deliver_event(SEND_ANSWER, vec![json!({"type": "answer", "sdp": "v=0 answer"})]);
    let expected = SignalingError::Transport("Connection closed".into());
    assert_eq!(next_fired(&mut fired).await?, Some(Fired::Error(expected.clone())));
    // The answer is not handed out without the acknowledgement.
    assert_eq!(next_fired(&mut fired).await?, None);

    assert_eq!(initiator.finished().await, Err(expected.clone()));
    assert_eq!(initiator.phase(), InitiatorPhase::Failed(expected));
    assert_eq!(relay.try_next_emitted(), None);
    assert_eq!(relay.close_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unsent_answer_is_reported_twice() -> Result<()> {
    init();
    let (receiver, mut relay, mut fired) =
        start_receiver_on(refusing(SEND_ANSWER), "tok123", Timeouts::default()).await?;
    relay.deliver(TransportEvent::Connected);
    expect_emit(&mut relay, NEW_RECEIVER).await?;
    relay.deliver_event(SEND_OFFER, vec![json!({"type": "offer", "sdp": "v=0 offer"})]);
    assert!(matches!(next_fired(&mut fired).await?, Some(Fired::Offer(_))));

    let expected = SignalingError::Transport("Connection closed".into());
    let err = receiver
        .send_answer(SessionDescription::answer("v=0 answer"))
        .unwrap_err();
    assert_eq!(err, expected);
    assert_eq!(next_fired(&mut fired).await?, Some(Fired::Error(expected.clone())));

    assert_eq!(receiver.phase(), ReceiverPhase::Failed(expected));
    assert_eq!(relay.close_count(), 1);
    Ok(())
}
