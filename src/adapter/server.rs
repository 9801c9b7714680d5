//! Thin wrapper over the `dap` crate server: request polling plus the three
//! response shapes we ever produce. Generic over the transport so the same
//! adapter runs on stdio (editor-spawned) and TCP (attach for development).

use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::{Arc, Mutex};

use dap::errors::ServerError;
use dap::events::Event;
use dap::requests::Request;
use dap::responses::{Response, ResponseBody, ResponseMessage};
use dap::server::{Server, ServerOutput};

pub struct DapServer<R: Read, W: Write> {
    server: Server<R, W>,
}

impl<R: Read, W: Write> DapServer<R, W> {
    pub fn new(input: R, output: W) -> DapServer<R, W> {
        let server = Server::new(BufReader::new(input), BufWriter::new(output));
        DapServer { server }
    }

    /// Shared handle for threads that emit events while the request loop
    /// holds the server itself (the break hook, the logger).
    pub fn output(&self) -> Arc<Mutex<ServerOutput<W>>> {
        self.server.output.clone()
    }

    pub fn poll_request(&mut self) -> Result<Option<Request>, ServerError> {
        let Some(req) = self.server.poll_request()? else {
            return Ok(None);
        };

        log::debug!(target: "dap", "{}: {:?}", req.seq, req.command);

        Ok(Some(req))
    }

    pub fn respond_success(&mut self, seq: i64, body: ResponseBody) -> Result<(), ServerError> {
        log::debug!(target: "dap", "success {seq}: {body:?}");

        self.server.respond(Response {
            request_seq: seq,
            success: true,
            message: None,
            body: Some(body),
            error: None,
        })
    }

    pub fn respond_error(&mut self, seq: i64, error: impl Into<String>) -> Result<(), ServerError> {
        let error = error.into();

        log::debug!(target: "dap", "error {seq}: {error}");

        self.server.respond(Response {
            request_seq: seq,
            success: false,
            message: Some(ResponseMessage::Error(error)),
            body: None,
            error: None,
        })
    }

    pub fn respond_cancel(&mut self, seq: i64) -> Result<(), ServerError> {
        log::debug!(target: "dap", "cancel {seq}");

        self.server.respond(Response {
            request_seq: seq,
            success: false,
            message: Some(ResponseMessage::Cancelled),
            body: None,
            error: None,
        })
    }

    pub fn send_event(&mut self, event: Event) -> Result<(), ServerError> {
        self.server.send_event(event)
    }
}
