//! 可观测性与错误上报集成测试
//!
//! 未安装 recorder 时，所有指标记录函数都必须是安全的空操作。

mod metrics_tests {
    use wecarry_shared::observability::metrics::{
        record_http_request, record_notification_enqueued, record_notification_send,
        record_thread_message, record_transition, record_transition_rejection, record_worker_job,
    };

    #[test]
    fn test_record_functions_without_recorder() {
        record_http_request("POST", "/api/requests/{id}/status", 200, 0.05);
        record_http_request("GET", "/api/threads/{id}/unread", 404, 0.01);
        record_transition("open", "committed");
        record_transition_rejection("NotAuthorized");
        record_thread_message();
        record_notification_enqueued("new-message", "email");
        record_worker_job("new_message", "permanent_failure", 1);
        record_notification_send("mobile", "ok");
    }
}

mod reporting_tests {
    use wecarry_shared::error::{AppError, ErrorKey};
    use wecarry_shared::reporting::{ErrorReport, ErrorReporter, RecordingReporter};

    #[tokio::test]
    async fn test_keyed_error_is_reported_with_specific_key() {
        let reporter = RecordingReporter::new();
        let err = AppError::from(sqlx::Error::PoolTimedOut).with_key(ErrorKey::ThreadsLoadFailure);

        reporter
            .report(ErrorReport::from_error(&err, "api:GET /api/threads/{id}"))
            .await;

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].key, ErrorKey::ThreadsLoadFailure);
        assert_eq!(reports[0].context, "api:GET /api/threads/{id}");
    }
}
