//! Pipe handler trait.

use dirpipe_core::Status;
use dirpipe_transport::AnyPipe;

/// Receives the pipes a server accepts.
pub trait PipeHandler {
    /// Called with the server end of every newly created pipe.
    ///
    /// # Arguments
    /// * `pipe` - Server end of the pipe; the handler owns and closes it
    fn on_pipe(&mut self, pipe: AnyPipe);

    /// Called when a request was answered with a failure status.
    ///
    /// # Arguments
    /// * `status` - Status sent to the client
    /// * `message` - Text sent with the status
    fn on_rejected(&mut self, _status: Status, _message: &str) {}
}

impl<F: FnMut(AnyPipe)> PipeHandler for F {
    fn on_pipe(&mut self, pipe: AnyPipe) {
        self(pipe);
    }
}
