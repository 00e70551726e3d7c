//! Client session.
//!
//! [`Client::connect`] establishes the control channel, authenticates,
//! and brings up the enabled data transports; the returned session owns
//! every thread and socket it created and tears them all down on drop.
//! All methods take `&self` and are safe to call from multiple threads.

use crate::config::ClientConfig;
use crate::control::{ControlChannel, EventHandlers};
use crate::error::{Error, Result};
use crate::meta::StreamMeta;
use crate::protocol::{self, FunctionInfo};
use crate::registry::{StreamCatalog, StreamRegistry};
use crate::state;
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Client {
    control: ControlChannel,
    registry: StreamRegistry,
    catalog: Arc<StreamCatalog>,
    token: String,
    client_ip: String,
    username: String,
    enabled: u32,
    closed: AtomicBool,
}

impl Client {
    /// Connects to the relay, authenticates with the configured
    /// credentials, and instantiates the enabled data transports.
    /// `handlers` receive server-initiated events for the lifetime of
    /// the session.
    pub fn connect(config: &ClientConfig, handlers: EventHandlers) -> Result<Self> {
        let server_ip: IpAddr = config.server.address.parse().map_err(|_| {
            Error::Value(format!("invalid server address: {}", config.server.address))
        })?;
        let catalog = Arc::new(StreamCatalog::new());
        let control = ControlChannel::connect(
            server_ip,
            config.server.port,
            handlers,
            Arc::clone(&catalog),
        )?;

        let id = control.reserve();
        let command = match &config.auth.token {
            Some(token) => protocol::auth_token(id, token),
            None => protocol::auth_password(id, &config.auth.username, &config.auth.password),
        };
        let response = control.send_and_await(&command, id);
        protocol::check_status(&response)?;
        let token = protocol::str_field(&response, "token")?;
        let client_ip = protocol::str_field(&response, "IP")?;

        let enabled = config.transports.bits();
        let registry = StreamRegistry::new(Arc::clone(&catalog), enabled, server_ip)?;
        info!(
            "connected to {}:{} as {}",
            config.server.address, config.server.port, config.auth.username
        );
        Ok(Client {
            control,
            registry,
            catalog,
            token,
            client_ip,
            username: config.auth.username.clone(),
            enabled,
            closed: AtomicBool::new(false),
        })
    }

    /// Session token issued by the server during authentication.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// This client's address as seen by the server.
    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    fn require_token(&self) -> Result<&str> {
        if self.token.is_empty() {
            Err(Error::NoToken)
        } else {
            Ok(&self.token)
        }
    }

    fn round_trip(&self, command: Value, id: u32) -> Result<Value> {
        let response = self.control.send_and_await(&command, id);
        protocol::check_status(&response)?;
        Ok(response)
    }

    /// Registers a sender stream. `proto` is a [`crate::state`] bit; it
    /// is intersected with the send direction and this session's
    /// enabled transports and must single out one transport. Returns
    /// the server-assigned stream id.
    pub fn create_sender(
        &self,
        workspace: &str,
        stream_type: &str,
        meta: &str,
        echo: bool,
        alert: bool,
        proto: u32,
    ) -> Result<i32> {
        let proto = proto & state::SEND & self.enabled;
        let name = state::proto_name(proto)
            .ok_or_else(|| Error::Value("invalid sender protocol".into()))?;
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        let command = protocol::sender(
            id,
            &token,
            &self.client_ip,
            workspace,
            stream_type,
            meta,
            echo,
            alert,
            name,
        );
        let response = self.round_trip(command, id)?;
        let stream_id = protocol::int_field(&response, "streamID")? as i32;
        let mtu = protocol::int_field(&response, "MTU")? as i32;
        let port = protocol::int_field(&response, "port")? as u16;
        self.registry.add_stream(
            StreamMeta {
                stream_id,
                state: proto,
                mtu,
                owner: self.username.clone(),
                workspace: workspace.to_string(),
                meta: meta.to_string(),
                types: vec![stream_type.to_string()],
                sources: HashSet::new(),
            },
            port,
        )?;
        debug!("sender stream {} open ({})", stream_id, name);
        Ok(stream_id)
    }

    /// Registers a receiver stream listening for the given types (empty
    /// means all types in the workspace). Returns the server-assigned
    /// stream id; senders already matching the filter appear in the
    /// stream's source set.
    pub fn create_receiver(
        &self,
        workspace: &str,
        types: &[String],
        meta: &str,
        echo: bool,
        alert: bool,
        proto: u32,
    ) -> Result<i32> {
        let proto = proto & state::RECV & self.enabled;
        let name = state::proto_name(proto)
            .ok_or_else(|| Error::Value("invalid receiver protocol".into()))?;
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        let command = protocol::receiver(
            id,
            &token,
            &self.client_ip,
            workspace,
            types,
            meta,
            echo,
            alert,
            name,
        );
        let response = self.round_trip(command, id)?;
        let stream_id = protocol::int_field(&response, "streamID")? as i32;
        let mtu = protocol::int_field(&response, "MTU")? as i32;
        let port = protocol::int_field(&response, "port")? as u16;
        let sources = protocol::stream_id_list(&response, "streamList")
            .unwrap_or_default()
            .into_iter()
            .collect();
        self.registry.add_stream(
            StreamMeta {
                stream_id,
                state: proto,
                mtu,
                owner: self.username.clone(),
                workspace: workspace.to_string(),
                meta: meta.to_string(),
                types: types.to_vec(),
                sources,
            },
            port,
        )?;
        debug!("receiver stream {} open ({})", stream_id, name);
        Ok(stream_id)
    }

    /// Asks the server to feed `sender_id` into the receiver stream.
    pub fn subscribe(&self, receiver_id: i32, sender_id: i32) -> Result<()> {
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        self.round_trip(protocol::subscribe(id, &token, receiver_id, sender_id), id)?;
        self.catalog.add_source(receiver_id, sender_id);
        Ok(())
    }

    /// Stops `sender_id` from feeding the receiver stream.
    pub fn unsubscribe(&self, receiver_id: i32, sender_id: i32) -> Result<()> {
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        self.round_trip(
            protocol::unsubscribe(id, &token, receiver_id, sender_id),
            id,
        )?;
        self.catalog.remove_source(receiver_id, sender_id);
        Ok(())
    }

    /// Closes one of this session's streams, both server-side and
    /// locally.
    pub fn disconnect_stream(&self, stream_id: i32) -> Result<()> {
        if self.catalog.get(stream_id).is_none() {
            return Err(Error::State(format!(
                "stream {} is not owned by this session",
                stream_id
            )));
        }
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        self.round_trip(protocol::disconnect(id, &token, stream_id), id)?;
        self.registry.remove_stream(stream_id);
        Ok(())
    }

    /// Sender stream ids visible on the server, filtered by workspaces
    /// and types (empty filters match everything).
    pub fn list_streams(&self, workspaces: &[String], types: &[String]) -> Result<Vec<i32>> {
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        let response =
            self.round_trip(protocol::list_streams(id, &token, workspaces, types), id)?;
        protocol::stream_id_list(&response, "senderList")
    }

    /// Server-side metadata for any stream, not just this session's.
    pub fn stream_info(&self, stream_id: i32) -> Result<StreamMeta> {
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        let response = self.round_trip(protocol::stream_info(id, &token, stream_id), id)?;
        protocol::parse_stream_info(&response)
    }

    pub fn list_workspaces(&self) -> Result<Vec<String>> {
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        let response = self.round_trip(protocol::list_workspaces(id, &token), id)?;
        protocol::str_list_field(&response, "workspaceList")
    }

    pub fn add_workspace(&self, workspace: &str) -> Result<()> {
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        self.round_trip(protocol::add_workspace(id, &token, workspace), id)?;
        Ok(())
    }

    pub fn rm_workspace(&self, workspace: &str) -> Result<()> {
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        self.round_trip(protocol::rm_workspace(id, &token, workspace), id)?;
        Ok(())
    }

    /// Names of the control functions the server exposes.
    pub fn list_functions(&self) -> Result<Vec<String>> {
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        let response = self.round_trip(protocol::list_functions(id, &token), id)?;
        protocol::str_list_field(&response, "functionList")
    }

    pub fn describe_function(&self, name: &str) -> Result<FunctionInfo> {
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        let response = self.round_trip(protocol::describe_function(id, &token, name), id)?;
        protocol::parse_function_info(&response)
    }

    /// Sends an arbitrary command object. The session token and a fresh
    /// correlation id are added; the returned response has the envelope
    /// fields stripped.
    pub fn generic_command(&self, command: &str) -> Result<Value> {
        let mut value: Value = serde_json::from_str(command)
            .map_err(|e| Error::Value(format!("invalid command JSON: {}", e)))?;
        let token = self.require_token()?.to_string();
        let id = self.control.reserve();
        match value.as_object_mut() {
            Some(object) => {
                object.insert("token".to_string(), token.into());
                object.insert("ID".to_string(), id.into());
            }
            None => return Err(Error::Value("command must be a JSON object".into())),
        }
        let mut response = self.round_trip(value, id)?;
        if let Some(object) = response.as_object_mut() {
            object.remove("ID");
            object.remove("statusCode");
        }
        Ok(response)
    }

    /// Transport/direction bit of a local stream, [`state::NONE`] when
    /// unknown.
    pub fn stream_state(&self, stream_id: i32) -> u32 {
        self.catalog.state_of(stream_id)
    }

    /// Local metadata for one of this session's streams.
    pub fn stream_meta(&self, stream_id: i32) -> Option<StreamMeta> {
        self.catalog.get(stream_id)
    }

    /// Ids of every stream this session currently owns.
    pub fn local_streams(&self) -> Vec<i32> {
        self.catalog.ids()
    }

    pub fn is_sender(&self, stream_id: i32) -> bool {
        self.catalog.is_type(stream_id, state::SEND)
    }

    pub fn is_receiver(&self, stream_id: i32) -> bool {
        self.catalog.is_type(stream_id, state::RECV)
    }

    /// Current source set of a local receiver stream.
    pub fn sources(&self, receiver_id: i32) -> Vec<i32> {
        self.catalog.sources(receiver_id)
    }

    /// Sends payload bytes with an empty header on a sender stream.
    pub fn send(&self, stream_id: i32, payload: &[u8]) -> Result<()> {
        self.send_with_header(stream_id, 0, payload, &[], false)
    }

    /// Sends payload and header bytes on a sender stream. With
    /// `server_check` set the relay validates the frame before
    /// forwarding it.
    pub fn send_with_header(
        &self,
        stream_id: i32,
        federation_id: i32,
        payload: &[u8],
        header: &[u8],
        server_check: bool,
    ) -> Result<()> {
        let stream_state = self.catalog.state_of(stream_id);
        if stream_state & state::SEND == 0 {
            return Err(Error::State(format!(
                "stream {} is not a sender owned by this session",
                stream_id
            )));
        }
        let channel = self.registry.channel(stream_state)?;
        let slot = channel
            .stream_ref(stream_id)
            .ok_or_else(|| Error::State("stream not registered with its transport".into()))?;
        if !channel.send(slot, stream_id, federation_id, payload, header, server_check)? {
            return Err(Error::State("stream closed during send".into()));
        }
        Ok(())
    }

    /// Installs the frame callback for a receiver stream. The callback
    /// runs on the stream's receive thread with arguments: receiver
    /// stream id, source stream id, header bytes, payload bytes.
    pub fn set_on_receive<F>(&self, stream_id: i32, callback: F) -> Result<()>
    where
        F: Fn(i32, i32, &[u8], &[u8]) + Send + Sync + 'static,
    {
        let stream_state = self.catalog.state_of(stream_id);
        if stream_state & state::RECV == 0 {
            return Err(Error::State(format!(
                "stream {} is not a receiver owned by this session",
                stream_id
            )));
        }
        let channel = self.registry.channel(stream_state)?;
        let slot = channel
            .stream_ref(stream_id)
            .ok_or_else(|| Error::State("stream not registered with its transport".into()))?;
        if !channel.set_callback(slot, stream_id, Arc::new(callback))? {
            return Err(Error::State("stream closed during callback install".into()));
        }
        Ok(())
    }

    /// Tears the session down: local stream state, data threads, then
    /// the control channel. Any caller blocked on a command is released
    /// with a communication error. Idempotent, callable from any
    /// thread; also runs on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing session for {}", self.username);
        self.registry.clear();
        self.control.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
