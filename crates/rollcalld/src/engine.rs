use crate::service::{
    Action, EnrollOutcome, MarkOutcome, Pipeline, PipelineError, PipelineStatus, RemoveOutcome,
};
use crate::trainer::TrainReport;
use chrono::NaiveDate;
use rollcall_core::{Classifier, Identity};
use rollcall_store::AttendanceRecord;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, PipelineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        caller: u32,
        user: String,
        label: String,
        image: Vec<u8>,
        reply: Reply<EnrollOutcome>,
    },
    Mark {
        caller: u32,
        user: String,
        frame: Vec<u8>,
        date: Option<NaiveDate>,
        reply: Reply<MarkOutcome>,
    },
    MarkManual {
        caller: u32,
        user: String,
        date: Option<NaiveDate>,
        reply: Reply<MarkOutcome>,
    },
    Train {
        caller: u32,
        reply: Reply<TrainReport>,
    },
    ListIdentities {
        reply: Reply<Vec<Identity>>,
    },
    ListImages {
        user: String,
        reply: Reply<Vec<String>>,
    },
    ReadImage {
        caller: u32,
        user: String,
        filename: String,
        reply: Reply<Vec<u8>>,
    },
    Remove {
        caller: u32,
        user: String,
        reply: Reply<RemoveOutcome>,
    },
    Report {
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        reply: Reply<Vec<AttendanceRecord>>,
    },
    Status {
        reply: Reply<PipelineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    pub async fn enroll(
        &self,
        caller: u32,
        user: String,
        label: String,
        image: Vec<u8>,
    ) -> Result<EnrollOutcome, EngineError> {
        self.call(|reply| EngineRequest::Enroll {
            caller,
            user,
            label,
            image,
            reply,
        })
        .await
    }

    pub async fn mark_attendance(
        &self,
        caller: u32,
        user: String,
        frame: Vec<u8>,
        date: Option<NaiveDate>,
    ) -> Result<MarkOutcome, EngineError> {
        self.call(|reply| EngineRequest::Mark {
            caller,
            user,
            frame,
            date,
            reply,
        })
        .await
    }

    pub async fn mark_manual(
        &self,
        caller: u32,
        user: String,
        date: Option<NaiveDate>,
    ) -> Result<MarkOutcome, EngineError> {
        self.call(|reply| EngineRequest::MarkManual {
            caller,
            user,
            date,
            reply,
        })
        .await
    }

    pub async fn train(&self, caller: u32) -> Result<TrainReport, EngineError> {
        self.call(|reply| EngineRequest::Train { caller, reply }).await
    }

    pub async fn list_identities(&self) -> Result<Vec<Identity>, EngineError> {
        self.call(|reply| EngineRequest::ListIdentities { reply }).await
    }

    pub async fn list_images(&self, user: String) -> Result<Vec<String>, EngineError> {
        self.call(|reply| EngineRequest::ListImages { user, reply }).await
    }

    pub async fn read_image(
        &self,
        caller: u32,
        user: String,
        filename: String,
    ) -> Result<Vec<u8>, EngineError> {
        self.call(|reply| EngineRequest::ReadImage {
            caller,
            user,
            filename,
            reply,
        })
        .await
    }

    pub async fn remove_identity(
        &self,
        caller: u32,
        user: String,
    ) -> Result<RemoveOutcome, EngineError> {
        self.call(|reply| EngineRequest::Remove { caller, user, reply })
            .await
    }

    pub async fn report(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, EngineError> {
        self.call(|reply| EngineRequest::Report { from, to, reply })
            .await
    }

    pub async fn status(&self) -> Result<PipelineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Gallery scans, decoding, training and SQLite writes are all blocking, so
/// the pipeline lives off the async runtime and requests are handled one at
/// a time.
pub fn spawn_engine<C>(pipeline: Pipeline<C>) -> Result<EngineHandle, EngineError>
where
    C: Classifier + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle(&pipeline, req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn handle<C: Classifier>(pipeline: &Pipeline<C>, req: EngineRequest) {
    // A dropped receiver means the caller went away; nothing to do.
    match req {
        EngineRequest::Enroll {
            caller,
            user,
            label,
            image,
            reply,
        } => {
            let result = pipeline
                .authorize(caller, Action::Enroll)
                .and_then(|_| pipeline.enroll(&user, &image, &label));
            let _ = reply.send(result);
        }
        EngineRequest::Mark {
            caller,
            user,
            frame,
            date,
            reply,
        } => {
            let result = pipeline
                .authorize(caller, Action::MarkFace { subject: &user })
                .and_then(|_| pipeline.mark_attendance(&user, &frame, date));
            let _ = reply.send(result);
        }
        EngineRequest::MarkManual {
            caller,
            user,
            date,
            reply,
        } => {
            let result = pipeline
                .authorize(caller, Action::MarkManual)
                .and_then(|_| pipeline.mark_manual(&user, date));
            let _ = reply.send(result);
        }
        EngineRequest::Train { caller, reply } => {
            let result = pipeline
                .authorize(caller, Action::Train)
                .and_then(|_| pipeline.train());
            let _ = reply.send(result);
        }
        EngineRequest::ListIdentities { reply } => {
            let _ = reply.send(pipeline.list_identities());
        }
        EngineRequest::ListImages { user, reply } => {
            let _ = reply.send(pipeline.list_images(&user));
        }
        EngineRequest::ReadImage {
            caller,
            user,
            filename,
            reply,
        } => {
            let result = pipeline
                .authorize(caller, Action::ViewImage { subject: &user })
                .and_then(|_| pipeline.read_image(&user, &filename));
            let _ = reply.send(result);
        }
        EngineRequest::Remove { caller, user, reply } => {
            let result = pipeline
                .authorize(caller, Action::RemoveIdentity)
                .and_then(|_| pipeline.remove_identity(&user));
            let _ = reply.send(result);
        }
        EngineRequest::Report { from, to, reply } => {
            let _ = reply.send(pipeline.report(from, to));
        }
        EngineRequest::Status { reply } => {
            let _ = reply.send(pipeline.status());
        }
    }
}
