//! Demo WebRTC peer signaled through the relay
//!
//! peer offer           announce, print the token, wait for an answer
//! peer answer <token>  join with a token and answer the offer

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use rtc_signaling::{Initiator, Receiver, SessionDescription, SignalingConfig};
use tokio::sync::oneshot;
use webrtc::{
    api::{interceptor_registry::register_default_interceptors, media_engine::MediaEngine, APIBuilder},
    data_channel::{data_channel_message::DataChannelMessage, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    rtc_signaling::init_logging();

    let config = SignalingConfig::from_env()?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    let pc = create_peer_connection().await?;
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["offer"] => run_initiator(&config, &pc).await?,
        ["answer", token] => run_receiver(&config, &pc, token).await?,
        _ => bail!("usage: peer offer | peer answer <token>"),
    }

    log::info!("Signaling done, press Ctrl-C to quit");
    tokio::signal::ctrl_c().await?;
    pc.close().await?;
    Ok(())
}

async fn create_peer_connection() -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = webrtc::interceptor::registry::Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_owned()],
            ..Default::default()
        }],
        ..Default::default()
    };

    let pc = Arc::new(api.new_peer_connection(config).await?);

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        log::info!("Peer connection state: {}", state);
        Box::pin(async {})
    }));

    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        Box::pin(async move {
            log::info!("Data channel '{}' opened by remote", dc.label());
            attach_logging(&dc);
        })
    }));

    Ok(pc)
}

fn attach_logging(dc: &Arc<RTCDataChannel>) {
    let label = dc.label().to_owned();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        log::info!("[{}] {}", label, String::from_utf8_lossy(&msg.data));
        Box::pin(async {})
    }));
}

/// Apply a local description and wait for ICE gathering so the SDP carries
/// every candidate.
async fn gather_local(pc: &RTCPeerConnection, desc: RTCSessionDescription) -> Result<SessionDescription> {
    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(desc).await?;
    let _ = gathered.recv().await;

    let local = pc
        .local_description()
        .await
        .ok_or_else(|| anyhow!("no local description after gathering"))?;
    Ok(SessionDescription::from_rtc(&local)?)
}

async fn run_initiator(config: &SignalingConfig, pc: &Arc<RTCPeerConnection>) -> Result<()> {
    let dc = pc.create_data_channel("demo", None).await?;
    attach_logging(&dc);
    let greeter = Arc::clone(&dc);
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            if let Err(e) = greeter.send_text("hello from the initiator".to_string()).await {
                log::warn!("Failed to greet: {}", e);
            }
        })
    }));

    let offer = pc.create_offer(None).await?;
    let offer = gather_local(pc, offer).await?;

    let (answer_tx, answer_rx) = oneshot::channel();
    let initiator = Initiator::from_config(config, offer)
        .on_token(|token| println!("Token: {}", token))
        .on_answer(move |answer| {
            let _ = answer_tx.send(answer);
        })
        .connect()
        .await?;

    let answer = match answer_rx.await {
        Ok(answer) => answer,
        Err(_) => {
            initiator.finished().await?;
            bail!("signaling ended without an answer");
        }
    };
    pc.set_remote_description(answer.to_rtc()?).await?;
    initiator.finished().await?;
    Ok(())
}

async fn run_receiver(config: &SignalingConfig, pc: &Arc<RTCPeerConnection>, token: &str) -> Result<()> {
    let (offer_tx, offer_rx) = oneshot::channel();
    let receiver = Receiver::from_config(config, token)
        .on_offer(move |offer| {
            let _ = offer_tx.send(offer);
        })
        .connect()
        .await?;

    let offer = match offer_rx.await {
        Ok(offer) => offer,
        Err(_) => {
            receiver.finished().await?;
            bail!("signaling ended without an offer");
        }
    };
    pc.set_remote_description(offer.to_rtc()?).await?;

    let answer = pc.create_answer(None).await?;
    let answer = gather_local(pc, answer).await?;
    receiver.send_answer(answer)?;
    receiver.finished().await?;
    Ok(())
}
