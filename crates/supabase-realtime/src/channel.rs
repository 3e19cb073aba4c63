use std::ops::ControlFlow;
use std::sync::Arc;

use change_feed::{ChannelSpec, ChannelStatus, FeedSignal};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::phoenix::{
    channel_topic, decode_change, heartbeat_frame, join_frame, leave_frame, reply_status, Frame,
    RefCounter, ReplyStatus, EVENT_CLOSE, EVENT_ERROR, EVENT_POSTGRES_CHANGES, EVENT_REPLY,
    EVENT_SYSTEM,
};
use crate::SupabaseConfig;

pub(crate) struct ChannelTask {
    pub config: Arc<SupabaseConfig>,
    pub socket_url: Url,
    pub spec: ChannelSpec,
    pub tx: mpsc::UnboundedSender<FeedSignal>,
    pub cancel: CancellationToken,
}

impl ChannelTask {
    fn status(&self, status: ChannelStatus) {
        let _ = self.tx.send(FeedSignal::Status(status));
    }

    /// Connects, joins the channel and forwards signals until the channel
    /// fails, the server closes it, or the subscription is released.
    pub(crate) async fn run(self) {
        let channel = self.spec.name.as_str();
        let connect = timeout(
            self.config.join_timeout,
            connect_async(self.socket_url.as_str()),
        );
        let stream = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = connect => match result {
                Ok(Ok((stream, _))) => stream,
                Ok(Err(err)) => {
                    warn!(target = "supabase.realtime", channel, error = %err, "websocket connect failed");
                    self.status(ChannelStatus::ChannelError);
                    return;
                }
                Err(_) => {
                    warn!(target = "supabase.realtime", channel, "websocket connect timed out");
                    self.status(ChannelStatus::TimedOut);
                    return;
                }
            }
        };
        let (mut write, mut read) = stream.split();

        let mut refs = RefCounter::default();
        let join_ref = refs.next();
        let topic = channel_topic(&self.spec);
        let join = join_frame(&self.spec, &join_ref, self.config.access_token.as_deref());
        if let Err(err) = send_frame(&mut write, &join).await {
            warn!(target = "supabase.realtime", channel, error = %err, "failed to send join");
            self.status(ChannelStatus::ChannelError);
            return;
        }
        debug!(target = "supabase.realtime", channel, join_ref = %join_ref, "join sent");

        let join_deadline = sleep(self.config.join_timeout);
        tokio::pin!(join_deadline);
        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        let mut joined = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let leave = leave_frame(&self.spec, &refs.next(), &join_ref);
                    let _ = send_frame(&mut write, &leave).await;
                    let _ = write.close().await;
                    debug!(target = "supabase.realtime", channel, "channel released");
                    return;
                }
                _ = &mut join_deadline, if !joined => {
                    warn!(target = "supabase.realtime", channel, "join reply not received in time");
                    self.status(ChannelStatus::TimedOut);
                    return;
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = send_frame(&mut write, &heartbeat_frame(&refs.next())).await {
                        warn!(target = "supabase.realtime", channel, error = %err, "heartbeat failed");
                        self.status(ChannelStatus::ChannelError);
                        return;
                    }
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => frame,
                            Err(err) => {
                                warn!(target = "supabase.realtime", channel, error = %err, "undecodable frame");
                                continue;
                            }
                        };
                        if self.dispatch(frame, &topic, &join_ref, &mut joined).is_break() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!(target = "supabase.realtime", channel, "socket closed by server");
                        self.status(ChannelStatus::Closed);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(target = "supabase.realtime", channel, error = %err, "socket error");
                        self.status(ChannelStatus::ChannelError);
                        return;
                    }
                },
            }
        }
    }

    fn dispatch(
        &self,
        frame: Frame,
        topic: &str,
        join_ref: &str,
        joined: &mut bool,
    ) -> ControlFlow<()> {
        if frame.topic != topic {
            return ControlFlow::Continue(());
        }
        let channel = self.spec.name.as_str();
        match frame.event.as_str() {
            EVENT_REPLY if !*joined && frame.reference.as_deref() == Some(join_ref) => {
                match reply_status(&frame.payload) {
                    Some(ReplyStatus::Ok) => {
                        *joined = true;
                        debug!(target = "supabase.realtime", channel, "channel joined");
                        self.status(ChannelStatus::Subscribed);
                        ControlFlow::Continue(())
                    }
                    Some(ReplyStatus::Error(reason)) => {
                        warn!(target = "supabase.realtime", channel, reason = %reason, "join rejected");
                        self.status(ChannelStatus::ChannelError);
                        ControlFlow::Break(())
                    }
                    None => {
                        warn!(target = "supabase.realtime", channel, "join reply without status");
                        self.status(ChannelStatus::ChannelError);
                        ControlFlow::Break(())
                    }
                }
            }
            EVENT_POSTGRES_CHANGES => {
                match decode_change(&frame.payload) {
                    Some(change) => {
                        let _ = self.tx.send(FeedSignal::Change(change));
                    }
                    None => {
                        warn!(target = "supabase.realtime", channel, "ignoring undecodable postgres change");
                    }
                }
                ControlFlow::Continue(())
            }
            EVENT_SYSTEM => match reply_status(&frame.payload) {
                Some(ReplyStatus::Error(reason)) => {
                    warn!(target = "supabase.realtime", channel, reason = %reason, "system error on channel");
                    self.status(ChannelStatus::ChannelError);
                    ControlFlow::Break(())
                }
                _ => ControlFlow::Continue(()),
            },
            EVENT_ERROR => {
                warn!(target = "supabase.realtime", channel, "channel errored");
                self.status(ChannelStatus::ChannelError);
                ControlFlow::Break(())
            }
            EVENT_CLOSE => {
                debug!(target = "supabase.realtime", channel, "channel closed by server");
                self.status(ChannelStatus::Closed);
                ControlFlow::Break(())
            }
            _ => ControlFlow::Continue(()),
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame).map_err(|err| err.to_string())?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|err| err.to_string())
}
