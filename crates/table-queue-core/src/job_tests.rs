//! Tests for handler contracts.

use super::*;
use crate::config::Config;
use crate::message::QueueName;
use crate::stores::MemoryStore;
use serde_json::json;

fn context(data: Value) -> Context {
    let producer = Arc::new(Producer::new(
        Arc::new(MemoryStore::default()),
        Arc::new(Config::new()),
    ));
    let message = Message::new(QueueName::new("orders").unwrap(), data.to_string());
    Context::new(producer, message, data)
}

struct Limited;

#[async_trait]
impl Job for Limited {
    async fn handle(&self, _ctx: Context) -> anyhow::Result<Disposition> {
        Ok(Disposition::Reject)
    }

    fn attempts(&self) -> Option<u32> {
        Some(2)
    }
}

mod disposition {
    use super::*;

    #[test]
    fn test_parse_known_values() {
        assert_eq!("ACK".parse::<Disposition>().unwrap(), Disposition::Ack);
        assert_eq!(Disposition::try_from("REJECT").unwrap(), Disposition::Reject);
        assert_eq!("REQUEUE".parse::<Disposition>().unwrap(), Disposition::Requeue);
    }

    #[test]
    fn test_unsupported_value_is_rejected() {
        let err = "MAYBE".parse::<Disposition>().unwrap_err();
        assert_eq!(err.value, "MAYBE");

        // Values are case-sensitive
        assert!("ack".parse::<Disposition>().is_err());
    }

    #[test]
    fn test_serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&Disposition::Requeue).unwrap(), "\"REQUEUE\"");
        let parsed: Disposition = serde_json::from_str("\"ACK\"").unwrap();
        assert_eq!(parsed, Disposition::Ack);
        assert_eq!(Disposition::Reject.to_string(), "REJECT");
    }
}

mod context {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Welcome {
        email: String,
    }

    #[test]
    fn test_data_as_decodes_body() {
        let ctx = context(json!({"email": "a@b.c"}));

        let welcome: Welcome = ctx.data_as().unwrap();
        assert_eq!(
            welcome,
            Welcome {
                email: "a@b.c".to_string()
            }
        );
        assert_eq!(ctx.message().queue().as_str(), "orders");
    }

    #[test]
    fn test_data_as_reports_mismatch() {
        let ctx = context(json!("plain"));
        assert!(ctx.data_as::<Welcome>().is_err());
    }
}

mod handlers {
    use super::*;

    #[tokio::test]
    async fn test_closure_is_a_processor() {
        let processor = |ctx: Context| async move {
            if ctx.data()["ok"].as_bool() == Some(true) {
                Ok(Disposition::Ack)
            } else {
                Ok::<_, anyhow::Error>(Disposition::Requeue)
            }
        };
        let handler = Handler::Processor(Arc::new(processor));

        assert_eq!(
            handler.invoke(context(json!({"ok": true}))).await.unwrap(),
            Disposition::Ack
        );
        assert_eq!(
            handler.invoke(context(json!({"ok": false}))).await.unwrap(),
            Disposition::Requeue
        );
        assert_eq!(handler.attempts(), None);
    }

    #[tokio::test]
    async fn test_job_handler_carries_attempts() {
        let handler = Handler::Job(Arc::new(Limited));

        assert_eq!(handler.attempts(), Some(2));
        assert_eq!(
            handler.invoke(context(json!({}))).await.unwrap(),
            Disposition::Reject
        );
    }

    #[test]
    fn test_job_defaults() {
        struct Plain;

        #[async_trait]
        impl Job for Plain {
            async fn handle(&self, _ctx: Context) -> anyhow::Result<Disposition> {
                Ok(Disposition::Ack)
            }
        }

        assert_eq!(Plain.queue(), "default");
        assert_eq!(Plain.attempts(), None);
    }
}
