use std::rc::Rc;

use tracing::{debug, info};

use super::{DISPATCH_TARGET, DispatchCore, InFlight, RequestMethod, RequestToken};
use crate::channel_manager::ChannelDetails;
use crate::errors::TpError;
use crate::handles::Handle;
use crate::transport::{MethodReply, ObjectPath, Signal};

/// Reports from channel managers back to their connection.
///
/// Every token a manager accepted must pass through exactly one of
/// [`new_channels`](Self::new_channels),
/// [`request_already_satisfied`](Self::request_already_satisfied) or
/// [`request_failed`](Self::request_failed).
#[derive(Debug, Clone)]
pub struct ManagerEvents {
    core: Rc<DispatchCore>,
}

impl ManagerEvents {
    pub(crate) const fn new(core: Rc<DispatchCore>) -> Self {
        Self { core }
    }

    /// Announces new channels and completes the requests they satisfy.
    ///
    /// `NewChannels` and the legacy `NewChannel` signals go out before any
    /// caller is answered.
    ///
    /// # Panics
    ///
    /// Panics if a token is not in flight, i.e. it was never dispatched or has
    /// already been resolved.
    pub fn new_channels(&self, batch: Vec<(ChannelDetails, Vec<RequestToken>)>) {
        if batch.is_empty() {
            return;
        }
        let claimed: Vec<(ChannelDetails, Vec<(RequestToken, InFlight)>)> = batch
            .into_iter()
            .map(|(details, tokens)| {
                let requests = tokens
                    .into_iter()
                    .map(|token| (token, self.claim(token)))
                    .collect();
                (details, requests)
            })
            .collect();

        let connection = self.core.connection_path();
        self.core.transport().emit_signal(
            connection,
            Signal::NewChannels {
                channels: claimed.iter().map(|(details, _)| details.clone()).collect(),
            },
        );
        for (details, requests) in &claimed {
            self.core.transport().emit_signal(
                connection,
                Signal::NewChannel {
                    path: details.path.clone(),
                    channel_type: details.channel_type().unwrap_or_default().to_owned(),
                    entity_type: details.entity_type(),
                    handle: Handle::raw_or_zero(details.target_handle()),
                    suppress_handler: requests
                        .iter()
                        .any(|(_, entry)| entry.method.suppresses_handler()),
                },
            );
        }

        for (details, requests) in claimed {
            info!(
                target: DISPATCH_TARGET,
                path = %details.path,
                satisfied = requests.len(),
                "new channel"
            );
            let mut yours_taken = requests
                .iter()
                .any(|(_, entry)| entry.method == RequestMethod::Create);
            for (token, entry) in requests {
                let reply = match entry.method {
                    RequestMethod::Create => MethodReply::ChannelCreated {
                        path: details.path.clone(),
                        properties: details.properties.clone(),
                    },
                    RequestMethod::Ensure => {
                        let yours = !yours_taken;
                        yours_taken = true;
                        MethodReply::ChannelEnsured {
                            yours,
                            path: details.path.clone(),
                            properties: details.properties.clone(),
                        }
                    }
                    RequestMethod::Request { .. } => MethodReply::ChannelRequested {
                        path: details.path.clone(),
                    },
                };
                debug!(target: DISPATCH_TARGET, %token, method = %entry.method, "request satisfied");
                self.core.reply(entry.call, Ok(reply));
            }
        }
    }

    /// Announces one new channel.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [`new_channels`](Self::new_channels).
    pub fn new_channel(&self, details: ChannelDetails, tokens: Vec<RequestToken>) {
        self.new_channels(vec![(details, tokens)]);
    }

    /// Completes a request with a channel that already existed.
    ///
    /// `EnsureChannel` callers are told the channel is not theirs to handle.
    ///
    /// # Panics
    ///
    /// Panics if the token is not in flight, or if it came from
    /// `CreateChannel`, which can never be satisfied by an existing channel.
    pub fn request_already_satisfied(&self, token: RequestToken, details: &ChannelDetails) {
        let entry = self.claim(token);
        let reply = match entry.method {
            RequestMethod::Create => {
                panic!("{token}: CreateChannel cannot be satisfied by an existing channel")
            }
            RequestMethod::Ensure => MethodReply::ChannelEnsured {
                yours: false,
                path: details.path.clone(),
                properties: details.properties.clone(),
            },
            RequestMethod::Request { .. } => MethodReply::ChannelRequested {
                path: details.path.clone(),
            },
        };
        debug!(
            target: DISPATCH_TARGET,
            %token,
            path = %details.path,
            "request satisfied by an existing channel"
        );
        self.core.reply(entry.call, Ok(reply));
    }

    /// Fails a request with the manager's error, forwarded verbatim.
    ///
    /// # Panics
    ///
    /// Panics if the token is not in flight.
    pub fn request_failed(&self, token: RequestToken, error: TpError) {
        let entry = self.claim(token);
        debug!(
            target: DISPATCH_TARGET,
            %token,
            error = %error,
            "request failed"
        );
        self.core.reply(entry.call, Err(error));
    }

    /// Announces that a channel has gone away.
    pub fn channel_closed(&self, path: &ObjectPath) {
        info!(target: DISPATCH_TARGET, %path, "channel closed");
        self.core.transport().emit_signal(
            self.core.connection_path(),
            Signal::ChannelClosed { path: path.clone() },
        );
    }

    /// Whether `token` still awaits resolution.
    #[must_use]
    pub fn is_pending(&self, token: RequestToken) -> bool {
        self.core.is_in_flight(token)
    }

    fn claim(&self, token: RequestToken) -> InFlight {
        self.core
            .claim(token)
            .unwrap_or_else(|| panic!("{token} satisfied twice or never dispatched"))
    }
}
