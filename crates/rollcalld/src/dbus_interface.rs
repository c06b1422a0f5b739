use crate::engine::{EngineError, EngineHandle};
use crate::service::PipelineError;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};
use zbus::fdo::DBusProxy;
use zbus::message::Header;
use zbus::names::BusName;
use zbus::{interface, Connection};

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Every method answers with a JSON object carrying `ok`, `status` and
/// `message`. Pipeline failures are reported in-band; only a dead engine
/// surfaces as a D-Bus error. Privileged calls act as the roster member
/// mapped to the sender's Unix uid.
pub struct AttendanceService {
    engine: EngineHandle,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Store an enrollment image for `user` and retrain.
    async fn enroll(
        &self,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] conn: &Connection,
        user: &str,
        label: &str,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        let caller = caller_uid(conn, &header).await?;
        tracing::info!(caller, user, label, bytes = image.len(), "enroll requested");
        let result = self
            .engine
            .enroll(caller, user.into(), label.into(), image)
            .await;
        respond(result)
    }

    /// Mark `user` present from a probe frame. An empty `date` means today.
    async fn mark_attendance(
        &self,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] conn: &Connection,
        user: &str,
        frame: Vec<u8>,
        date: &str,
    ) -> zbus::fdo::Result<String> {
        let caller = caller_uid(conn, &header).await?;
        tracing::info!(caller, user, date, "mark_attendance requested");
        let date = parse_date(date)?;
        let result = self
            .engine
            .mark_attendance(caller, user.into(), frame, date)
            .await;
        respond(result)
    }

    /// Mark `user` present without a frame.
    async fn mark_manual(
        &self,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] conn: &Connection,
        user: &str,
        date: &str,
    ) -> zbus::fdo::Result<String> {
        let caller = caller_uid(conn, &header).await?;
        tracing::info!(caller, user, date, "mark_manual requested");
        let date = parse_date(date)?;
        respond(self.engine.mark_manual(caller, user.into(), date).await)
    }

    async fn train(
        &self,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] conn: &Connection,
    ) -> zbus::fdo::Result<String> {
        let caller = caller_uid(conn, &header).await?;
        tracing::info!(caller, "train requested");
        respond(self.engine.train(caller).await)
    }

    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        respond(self.engine.list_identities().await)
    }

    async fn list_images(&self, user: &str) -> zbus::fdo::Result<String> {
        respond(self.engine.list_images(user.into()).await)
    }

    /// Raw bytes of one enrollment image.
    async fn get_image(
        &self,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] conn: &Connection,
        user: &str,
        filename: &str,
    ) -> zbus::fdo::Result<Vec<u8>> {
        let caller = caller_uid(conn, &header).await?;
        tracing::debug!(caller, user, filename, "get_image requested");
        self.engine
            .read_image(caller, user.into(), filename.into())
            .await
            .map_err(bus_error)
    }

    /// Delete every enrollment image of `user` and retrain.
    async fn remove_identity(
        &self,
        #[zbus(header)] header: Header<'_>,
        #[zbus(connection)] conn: &Connection,
        user: &str,
    ) -> zbus::fdo::Result<String> {
        let caller = caller_uid(conn, &header).await?;
        tracing::info!(caller, user, "remove_identity requested");
        respond(self.engine.remove_identity(caller, user.into()).await)
    }

    /// Attendance rows between two dates, inclusive. Empty bounds are open.
    async fn report(&self, from: &str, to: &str) -> zbus::fdo::Result<String> {
        let (from, to) = (parse_date(from)?, parse_date(to)?);
        respond(self.engine.report(from, to).await)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        let result = self.engine.status().await.map(|status| {
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "pipeline": status,
            })
        });
        respond(result)
    }
}

/// Unix uid of the connection that sent `header`, as reported by the bus.
async fn caller_uid(conn: &Connection, header: &Header<'_>) -> zbus::fdo::Result<u32> {
    let sender = header
        .sender()
        .ok_or_else(|| zbus::fdo::Error::AccessDenied("message has no sender".into()))?;
    let dbus = DBusProxy::new(conn).await?;
    dbus.get_connection_unix_user(BusName::from(sender.to_owned()))
        .await
}

fn parse_date(value: &str) -> zbus::fdo::Result<Option<NaiveDate>> {
    if value.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad date {value:?}: {e}")))
}

/// Map a failure onto a D-Bus error, for methods that do not answer in JSON.
fn bus_error(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::Pipeline(e @ PipelineError::Forbidden { .. }) => {
            zbus::fdo::Error::AccessDenied(e.to_string())
        }
        EngineError::Pipeline(e @ PipelineError::ImageNotFound { .. }) => {
            zbus::fdo::Error::FileNotFound(e.to_string())
        }
        EngineError::Pipeline(e @ PipelineError::InvalidIdentity(_)) => {
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        e => zbus::fdo::Error::Failed(e.to_string()),
    }
}

fn respond<T: Serialize>(result: Result<T, EngineError>) -> zbus::fdo::Result<String> {
    Ok(to_response(result)?.to_string())
}

fn to_response<T: Serialize>(result: Result<T, EngineError>) -> zbus::fdo::Result<Value> {
    match result {
        Ok(value) => {
            let value = serde_json::to_value(value)
                .map_err(|e| zbus::fdo::Error::Failed(format!("serialize response: {e}")))?;
            let mut body = json!({ "ok": true, "status": "ok", "message": "" });
            match value {
                // Outcome fields (ok, status, message) take precedence over the defaults.
                Value::Object(fields) => {
                    if let Value::Object(map) = &mut body {
                        map.extend(fields);
                    }
                }
                other => body["data"] = other,
            }
            Ok(body)
        }
        Err(EngineError::Pipeline(e)) => {
            tracing::warn!(status = e.status(), error = %e, "request failed");
            Ok(json!({ "ok": false, "status": e.status(), "message": e.to_string() }))
        }
        Err(e) => Err(zbus::fdo::Error::Failed(e.to_string())),
    }
}
