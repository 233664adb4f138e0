use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use cidag::exec::invoker::InvocationFuture;
use cidag::exec::{ActionInvoker, Invocation, InvocationOutput, InvocationRequest};

/// Scripted reply for invocations whose command or action contains a needle.
#[derive(Debug, Clone)]
enum Reply {
    Output(InvocationOutput),
    /// Wait until cancelled, then report a cancelled process.
    Hang,
}

/// An action invoker that never spawns anything.
///
/// Unmatched invocations succeed with empty output. Every request is recorded.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInvoker {
    replies: Vec<(String, Reply)>,
    requests: Arc<Mutex<Vec<InvocationRequest>>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `code` for invocations mentioning `needle`.
    pub fn exit(mut self, needle: &str, code: i32, output: &str) -> Self {
        let reply = if code == 0 {
            InvocationOutput::success(output)
        } else {
            InvocationOutput::failure(code, output)
        };
        self.replies.push((needle.to_string(), Reply::Output(reply)));
        self
    }

    pub fn hang(mut self, needle: &str) -> Self {
        self.replies.push((needle.to_string(), Reply::Hang));
        self
    }

    pub fn requests(&self) -> Vec<InvocationRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn reply_for(&self, invocation: &Invocation) -> Option<Reply> {
        let haystack = match invocation {
            Invocation::Command { script, .. } => script.as_str(),
            Invocation::Action { reference, .. } => reference.as_str(),
        };
        self.replies
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
    }
}

impl ActionInvoker for ScriptedInvoker {
    fn invoke(
        &self,
        request: InvocationRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> InvocationFuture<'_> {
        let reply = self.reply_for(&request.invocation);
        self.requests.lock().unwrap().push(request);
        Box::pin(async move {
            match reply {
                None => Ok(InvocationOutput::success("")),
                Some(Reply::Output(out)) => Ok(out),
                Some(Reply::Hang) => {
                    cidag::exec::cancelled(&mut cancel).await;
                    Ok(InvocationOutput {
                        exit_code: 143,
                        cancelled: true,
                        ..Default::default()
                    })
                }
            }
        })
    }
}
