// The per-message interceptor chain.
//
// Every inbound frame runs, in order: require_authentication → rate_limit →
// validate_message (JSON shape, type whitelist, length, sanitization) →
// require_permission (optional) → dispatch. Each stage either continues
// with the (possibly rewritten) payload or short-circuits with an error
// frame; identity failures also close the connection, validation and
// rate-limit failures do not. A stage failure is terminal for the message,
// never for the pipeline.

use std::sync::Arc;

use crewline_common::{
    protocol::ws::{Envelope, ErrorFrame},
    types::UserIdentity,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::{gate::ConnectionGate, permissions::PermissionChecker},
    error::{ErrorKind, GatewayError},
    metrics::MetricsCollector,
    ratelimit::RateLimiter,
    validate,
};

/// Outcome of running a frame through the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineVerdict {
    /// Hand the validated, sanitized envelope to the business handler.
    Dispatch(Envelope),
    /// Send the error frame; tear the connection down when `close` is set.
    Reject { frame: ErrorFrame, close: bool },
}

/// Authorization requirement for dispatched messages, configured where the
/// business handler is registered.
#[derive(Debug, Clone)]
pub enum RequiredPermission {
    /// A named permission, optionally object-scoped.
    Named { permission: String, obj: Option<Uuid> },
    /// Project membership, resolved from the payload's `project_id` field.
    ProjectMembership,
}

pub struct MessagePipeline {
    gate: ConnectionGate,
    rate_limiter: Arc<RateLimiter>,
    permission_checker: PermissionChecker,
    metrics: Arc<MetricsCollector>,
    required_permission: Option<RequiredPermission>,
}

impl MessagePipeline {
    pub fn new(
        gate: ConnectionGate,
        rate_limiter: Arc<RateLimiter>,
        permission_checker: PermissionChecker,
        metrics: Arc<MetricsCollector>,
        required_permission: Option<RequiredPermission>,
    ) -> Self {
        Self { gate, rate_limiter, permission_checker, metrics, required_permission }
    }

    /// Run one raw text frame through the full chain.
    pub async fn process(&self, identity: Option<&UserIdentity>, raw: &str) -> PipelineVerdict {
        // require_authentication
        let user = match self.gate.validate_authentication(identity) {
            Ok(user) => user,
            Err(error) => return self.reject(error),
        };

        // rate_limit: the rejected message is dropped, not recorded, and
        // the connection stays open so the client can back off.
        if self.rate_limiter.check(user.user_id).is_limited() {
            return self.reject(GatewayError::new(
                ErrorKind::RateLimitExceeded,
                "Rate limit exceeded",
            ));
        }

        // validate_message
        let envelope = match self.validate_message(raw) {
            Ok(envelope) => envelope,
            Err(error) => return self.reject(error),
        };

        // require_permission
        if let Some(requirement) = &self.required_permission {
            if let Err(error) = self.check_required_permission(user, requirement, &envelope).await
            {
                return self.reject(error);
            }
        }

        PipelineVerdict::Dispatch(envelope)
    }

    /// JSON shape, type whitelist, length, then sanitization — in that
    /// order, so sanitization happens exactly once, on payloads that are
    /// already known to be dispatchable.
    fn validate_message(&self, raw: &str) -> Result<Envelope, GatewayError> {
        let validation_error =
            |message: String| GatewayError::new(ErrorKind::ValidationFailed, message);

        let mut payload = validate::validate_json(raw).map_err(validation_error)?;

        let message_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        validate::validate_message_type(&message_type).map_err(validation_error)?;

        validate::validate_message_length(&Value::Object(payload.clone()))
            .map_err(validation_error)?;

        // Rewrite the in-flight payload with the sanitized message body.
        if let Some(Value::String(text)) = payload.get("message") {
            let sanitized = validate::sanitize_message(text);
            if sanitized != *text {
                self.metrics
                    .error_occurred(ErrorKind::SecurityViolation.as_str(), &message_type);
            }
            payload.insert("message".to_string(), Value::String(sanitized));
        }

        Ok(Envelope::new(message_type, payload))
    }

    async fn check_required_permission(
        &self,
        user: &UserIdentity,
        requirement: &RequiredPermission,
        envelope: &Envelope,
    ) -> Result<(), GatewayError> {
        match requirement {
            RequiredPermission::Named { permission, obj } => {
                if self.permission_checker.check_permission(user, permission, *obj).await {
                    Ok(())
                } else {
                    Err(GatewayError::new(
                        ErrorKind::PermissionDenied,
                        format!("Permission '{permission}' denied"),
                    ))
                }
            }
            RequiredPermission::ProjectMembership => {
                let project_id = envelope
                    .payload
                    .get("project_id")
                    .and_then(Value::as_str)
                    .and_then(|raw| Uuid::parse_str(raw).ok())
                    .ok_or_else(|| {
                        GatewayError::new(
                            ErrorKind::ValidationFailed,
                            "project_id is required",
                        )
                    })?;
                self.permission_checker.check_project_access(user, project_id).await
            }
        }
    }

    fn reject(&self, error: GatewayError) -> PipelineVerdict {
        self.metrics.error_occurred(error.kind.as_str(), &error.message);
        PipelineVerdict::Reject { frame: error.to_frame(), close: error.closes_connection() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::permissions::{PermissionBackend, ProjectDirectory},
        ratelimit::RateCounterStore,
        store::TtlStore,
    };
    use crewline_common::types::ProjectRecord;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        pipeline: MessagePipeline,
        metrics: Arc<MetricsCollector>,
        permissions: PermissionBackend,
        projects: ProjectDirectory,
    }

    fn fixture(max_messages: u32, required: Option<RequiredPermission>) -> Fixture {
        let metrics = Arc::new(MetricsCollector::new(TtlStore::memory()));
        let permissions = PermissionBackend::memory();
        let projects = ProjectDirectory::memory();
        let pipeline = MessagePipeline::new(
            ConnectionGate::default(),
            Arc::new(RateLimiter::new(
                RateCounterStore::memory(),
                max_messages,
                Duration::from_secs(60),
            )),
            PermissionChecker::new(permissions.clone(), projects.clone()),
            Arc::clone(&metrics),
            required,
        );
        Fixture { pipeline, metrics, permissions, projects }
    }

    fn user() -> UserIdentity {
        UserIdentity::active(Uuid::new_v4(), "ada")
    }

    fn assert_rejected(verdict: PipelineVerdict, expect_close: bool, needle: &str) {
        match verdict {
            PipelineVerdict::Reject { frame, close } => {
                assert_eq!(close, expect_close, "close policy mismatch for: {}", frame.error);
                assert!(frame.error.contains(needle), "unexpected error: {}", frame.error);
            }
            PipelineVerdict::Dispatch(_) => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn missing_identity_closes_the_connection() {
        let fx = fixture(10, None);
        let verdict = fx.pipeline.process(None, r#"{"type":"ping"}"#).await;
        assert_rejected(verdict, true, "Authentication required");
    }

    #[tokio::test]
    async fn inactive_identity_closes_the_connection() {
        let fx = fixture(10, None);
        let mut dormant = user();
        dormant.is_active = false;
        let verdict = fx.pipeline.process(Some(&dormant), r#"{"type":"ping"}"#).await;
        assert_rejected(verdict, true, "inactive");
    }

    #[tokio::test]
    async fn rate_limited_messages_are_dropped_but_connection_stays_open() {
        let fx = fixture(1, None);
        let user = user();

        let first = fx.pipeline.process(Some(&user), r#"{"type":"ping"}"#).await;
        assert!(matches!(first, PipelineVerdict::Dispatch(_)));

        let second = fx.pipeline.process(Some(&user), r#"{"type":"ping"}"#).await;
        assert_rejected(second, false, "Rate limit exceeded");
        assert_eq!(fx.metrics.error_stats().by_type.get("rate_limit_exceeded"), Some(&1));
    }

    #[tokio::test]
    async fn malformed_json_is_rejected_without_closing() {
        let fx = fixture(10, None);
        let user = user();
        let verdict = fx.pipeline.process(Some(&user), "{not json").await;
        assert_rejected(verdict, false, "Invalid JSON");
    }

    #[tokio::test]
    async fn disallowed_type_is_rejected_without_closing() {
        let fx = fixture(10, None);
        let user = user();
        let verdict = fx.pipeline.process(Some(&user), r#"{"type":"shutdown"}"#).await;
        assert_rejected(verdict, false, "not allowed");
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_without_closing() {
        let fx = fixture(10, None);
        let user = user();
        let raw = serde_json::to_string(&json!({
            "type": "chat_message",
            "message": "a".repeat(11_000),
        }))
        .expect("payload should serialize");
        let verdict = fx.pipeline.process(Some(&user), &raw).await;
        assert_rejected(verdict, false, "too long");
    }

    #[tokio::test]
    async fn message_field_is_sanitized_exactly_once_before_dispatch() {
        let fx = fixture(10, None);
        let user = user();
        let raw = r#"{"type":"chat_message","message":"<script>alert('x')</script>Hello"}"#;

        let verdict = fx.pipeline.process(Some(&user), raw).await;
        let PipelineVerdict::Dispatch(envelope) = verdict else {
            panic!("expected dispatch");
        };
        let sanitized = envelope.payload["message"].as_str().expect("message is a string");
        assert!(!sanitized.contains("<script>"));
        assert!(!sanitized.contains("alert("));
        assert!(sanitized.contains("Hello"));
        assert_eq!(fx.metrics.error_stats().by_type.get("security_violation"), Some(&1));
    }

    #[tokio::test]
    async fn named_permission_denial_closes_the_connection() {
        let fx = fixture(
            10,
            Some(RequiredPermission::Named {
                permission: "chat.post_message".to_string(),
                obj: None,
            }),
        );
        let user = user();

        let denied = fx.pipeline.process(Some(&user), r#"{"type":"chat_message"}"#).await;
        assert_rejected(denied, true, "denied");

        fx.permissions.grant(user.user_id, "chat.post_message", None).await;
        let granted = fx.pipeline.process(Some(&user), r#"{"type":"chat_message"}"#).await;
        assert!(matches!(granted, PipelineVerdict::Dispatch(_)));
    }

    #[tokio::test]
    async fn project_membership_is_enforced_from_the_payload() {
        let fx = fixture(10, Some(RequiredPermission::ProjectMembership));
        let member = user();
        let outsider = user();
        let project_id = Uuid::new_v4();
        fx.projects
            .upsert(ProjectRecord {
                project_id,
                owner_id: member.user_id,
                assigned_user_ids: vec![],
            })
            .await;

        let raw = format!(r#"{{"type":"status_update","project_id":"{project_id}"}}"#);

        let ok = fx.pipeline.process(Some(&member), &raw).await;
        assert!(matches!(ok, PipelineVerdict::Dispatch(_)));

        let denied = fx.pipeline.process(Some(&outsider), &raw).await;
        assert_rejected(denied, true, "Access denied");

        let missing = fx
            .pipeline
            .process(Some(&member), r#"{"type":"status_update"}"#)
            .await;
        assert_rejected(missing, false, "project_id is required");
    }
}
