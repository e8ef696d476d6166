//! Integration tests against a running chat backend.
//! These tests require LMCHAT_BASE_URL in the environment to run.

#[cfg(test)]
mod tests {
    use lmchat::{ChatBackend, HttpBackend, SendMessageRequest, StreamEvent};

    fn live_backend() -> Option<HttpBackend> {
        let base_url = std::env::var("LMCHAT_BASE_URL").ok();
        if base_url.is_none() {
            eprintln!("Skipping test: LMCHAT_BASE_URL not set");
            return None;
        }
        Some(HttpBackend::new(base_url).expect("Failed to create client"))
    }

    #[tokio::test]
    async fn test_list_models() {
        let Some(backend) = live_backend() else {
            return;
        };
        let models = backend.list_models().await;
        assert!(models.is_ok(), "Model catalog should load");
    }

    #[tokio::test]
    async fn test_streaming_response() {
        let Some(backend) = live_backend() else {
            return;
        };
        let models = backend.list_models().await.expect("Model catalog should load");
        let Some(model) = models.first() else {
            eprintln!("Skipping test: backend offers no models");
            return;
        };

        let chat = backend.create_chat().await.expect("Chat should be created");
        let request = SendMessageRequest {
            chat_id: chat.id.clone(),
            content: "Count to 3".to_string(),
            model: model.id.clone(),
        };
        let ack = backend.send_message(&request).await;
        assert!(ack.is_ok(), "Message should be accepted");

        let mut decoder = backend
            .open_stream(&chat.id, &model.id)
            .await
            .expect("Stream should open");
        let mut last = None;
        while let Some(event) = decoder.next_event().await {
            last = Some(event);
        }
        assert!(
            matches!(last, Some(StreamEvent::Done) | Some(StreamEvent::ServerError(_))),
            "Stream should end with a terminal frame, got {last:?}"
        );

        let _ = backend.delete_chat(&chat.id).await;
    }
}
