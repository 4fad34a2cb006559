//! HTTP API: the streaming chat endpoint plus conversation and product
//! resources.

use axum::extract::{ DefaultBodyLimit, Multipart, Path, Query, State };
use axum::http::{ header, HeaderName, StatusCode };
use axum::response::sse::{ Event, KeepAlive, Sse };
use axum::response::IntoResponse;
use axum::routing::{ delete, get, post, put };
use axum::{ Json, Router };
use tower_http::cors::{ Any, CorsLayer };
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::Stream;
use log::{ debug, info };
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::error::{ ApiError, FieldErrors };
use crate::agent::ChatAgent;
use crate::llm::chat::ImageAttachment;
use crate::models::chat::{ ChatMessage, ConversationSummary };
use crate::models::product::{ Product, ProductInput };
use crate::models::stream::StreamEvent;
use crate::store::ConversationStore;
use crate::stream::relay::{ self, RelayOptions };

/// Bounds applied to incoming chat requests before any work happens.
#[derive(Clone, Debug)]
pub struct RequestLimits {
    pub max_prompt_chars: usize,
    pub max_image_bytes: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub store: ConversationStore,
    pub agent: ChatAgent,
    pub relay_options: RelayOptions,
    pub limits: RequestLimits,
}

pub async fn start_http_server(
    addr: &str,
    state: AppState
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Starting HTTP API server on: http://{}", addr);

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    // The multipart chat endpoint carries image uploads, so the body limit
    // tracks the configured image cap plus some headroom for the text
    // fields.
    let body_limit = state.limits.max_image_bytes + 64 * 1024;

    let app = router(state).layer(DefaultBodyLimit::max(body_limit)).layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/send-message", post(send_message))
        .route("/conversations", get(list_conversations))
        .route("/conversations/{id}/messages", get(list_messages))
        .route("/conversations/{id}", delete(delete_conversation))
        .route("/products", get(list_products).post(create_product))
        .route("/products/{id}", put(update_product).delete(delete_product))
        .with_state(state)
}

// --- Chat streaming ---

/// Raw multipart fields of a chat request, before validation.
#[derive(Default)]
struct SendMessageForm {
    prompt: Option<String>,
    conversation_id: Option<String>,
    image: Option<(String, Vec<u8>)>,
}

/// Validated chat request.
struct SendMessage {
    prompt: String,
    conversation_id: Option<i64>,
    image: Option<ImageAttachment>,
}

pub async fn send_message(
    State(state): State<AppState>,
    mut multipart: Multipart
) -> Result<impl IntoResponse, ApiError> {
    let mut form = SendMessageForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::Internal(e.to_string()))? {
        match field.name().unwrap_or_default() {
            "prompt" => {
                form.prompt = Some(field.text().await.map_err(|e| ApiError::Internal(e.to_string()))?);
            }
            "conversation_id" => {
                form.conversation_id = Some(
                    field.text().await.map_err(|e| ApiError::Internal(e.to_string()))?
                );
            }
            "image" => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| ApiError::Internal(e.to_string()))?;
                form.image = Some((content_type, bytes.to_vec()));
            }
            other => {
                debug!("Ignoring unknown multipart field '{}'", other);
            }
        }
    }

    let request = validate_send_message(form, &state.limits).map_err(ApiError::Validation)?;

    let conversation = state.store
        .create_or_load(&request.prompt, request.conversation_id).await?;
    info!("Handling /send-message for conversation {}", conversation.id);

    let chunks = state.agent
        .stream_reply(conversation.id, &request.prompt, request.image).await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let (tx, rx) = mpsc::channel::<StreamEvent>(32);
    tokio::spawn(
        relay::run(state.store.clone(), conversation.id, chunks, tx, state.relay_options.clone())
    );

    let events: ReceiverStream<StreamEvent> = ReceiverStream::new(rx);
    let sse_stream = sse_events(events);

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(sse_stream).keep_alive(KeepAlive::default()),
    ))
}

fn sse_events(
    events: ReceiverStream<StreamEvent>
) -> impl Stream<Item = Result<Event, Infallible>> {
    events.map(|event| Ok(Event::default().data(event.to_json())))
}

/// Field-level validation of the chat form. All failures are collected so
/// the client gets every problem at once.
fn validate_send_message(
    form: SendMessageForm,
    limits: &RequestLimits
) -> Result<SendMessage, FieldErrors> {
    let mut errors = FieldErrors::new();

    let prompt = form.prompt.unwrap_or_default();
    if prompt.trim().is_empty() {
        errors
            .entry("prompt".to_string())
            .or_default()
            .push("Please enter a message.".to_string());
    } else if prompt.chars().count() > limits.max_prompt_chars {
        errors
            .entry("prompt".to_string())
            .or_default()
            .push(
                format!(
                    "Your message is too long. Please keep it under {} characters.",
                    group_digits(limits.max_prompt_chars)
                )
            );
    }

    let conversation_id = match form.conversation_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) =>
            match raw.parse::<i64>() {
                Ok(id) if id > 0 => Some(id),
                _ => {
                    errors
                        .entry("conversation_id".to_string())
                        .or_default()
                        .push("Invalid conversation ID format.".to_string());
                    None
                }
            }
    };

    let image = match form.image {
        Some((content_type, bytes)) if !bytes.is_empty() => {
            if !content_type.starts_with("image/") {
                errors
                    .entry("image".to_string())
                    .or_default()
                    .push("The uploaded file must be an image.".to_string());
                None
            } else if bytes.len() > limits.max_image_bytes {
                errors
                    .entry("image".to_string())
                    .or_default()
                    .push(
                        format!(
                            "The image size must not exceed {}MB.",
                            limits.max_image_bytes / (1024 * 1024)
                        )
                    );
                None
            } else {
                Some(ImageAttachment {
                    mime_type: content_type,
                    data_base64: BASE64.encode(&bytes),
                })
            }
        }
        _ => None,
    };

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(SendMessage { prompt, conversation_id, image })
}

/// 10000 -> "10,000", matching the wording of the client-facing messages.
fn group_digits(value: usize) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

// --- Conversation resources ---

pub async fn list_conversations(
    State(state): State<AppState>
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    Ok(Json(state.store.list_conversations().await?))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<i64>
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    if !state.store.conversation_exists(id).await? {
        return Err(ApiError::NotFound("Conversation"));
    }
    Ok(Json(state.store.list_messages(id).await?))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<i64>
) -> Result<StatusCode, ApiError> {
    if !state.store.delete_conversation(id).await? {
        return Err(ApiError::NotFound("Conversation"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// --- Product resources ---

#[derive(Deserialize, Default)]
pub struct ProductQuery {
    search: Option<String>,
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>
) -> Result<Json<Vec<Product>>, ApiError> {
    let products = match query.search.as_deref().map(str::trim) {
        Some(search) if !search.is_empty() => state.store.search_products(search).await?,
        _ => state.store.list_products().await?,
    };
    Ok(Json(products))
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<ProductInput>
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let (title, category, price) = validate_product(&input)?;
    let product = state.store
        .create_product(title, category, input.thumbnail.as_deref(), price).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<ProductInput>
) -> Result<StatusCode, ApiError> {
    let (title, category, price) = validate_product(&input)?;
    if !state.store.update_product(id, title, category, input.thumbnail.as_deref(), price).await? {
        return Err(ApiError::NotFound("Product"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<i64>
) -> Result<StatusCode, ApiError> {
    if !state.store.delete_product(id).await? {
        return Err(ApiError::NotFound("Product"));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn validate_product(input: &ProductInput) -> Result<(&str, &str, f64), ApiError> {
    let mut errors = FieldErrors::new();

    let title = input.title.as_deref().map(str::trim).unwrap_or_default();
    if title.is_empty() {
        errors.insert(
            "title".to_string(),
            vec!["The title field is required.".to_string()]
        );
    } else if title.chars().count() > 255 {
        errors.insert(
            "title".to_string(),
            vec!["The title must not be greater than 255 characters.".to_string()]
        );
    }
    let category = input.category.as_deref().map(str::trim).unwrap_or_default();
    if category.is_empty() {
        errors.insert(
            "category".to_string(),
            vec!["The category field is required.".to_string()]
        );
    } else if category.chars().count() > 255 {
        errors.insert(
            "category".to_string(),
            vec!["The category must not be greater than 255 characters.".to_string()]
        );
    }
    let price = match input.price {
        Some(price) if price >= 0.0 => price,
        Some(_) => {
            errors.insert(
                "price".to_string(),
                vec!["The price must be at least 0.".to_string()]
            );
            0.0
        }
        None => {
            errors.insert(
                "price".to_string(),
                vec!["The price field is required.".to_string()]
            );
            0.0
        }
    };

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    Ok((title, category, price))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RequestLimits {
        RequestLimits {
            max_prompt_chars: 10_000,
            max_image_bytes: 10 * 1024 * 1024,
        }
    }

    fn form(prompt: &str) -> SendMessageForm {
        SendMessageForm {
            prompt: Some(prompt.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let errors = validate_send_message(form("   "), &limits()).err().unwrap();
        assert_eq!(errors["prompt"], vec!["Please enter a message."]);
    }

    #[test]
    fn oversized_prompt_is_rejected_with_grouped_limit() {
        let errors = validate_send_message(form(&"x".repeat(10_001)), &limits()).err().unwrap();
        assert_eq!(
            errors["prompt"],
            vec!["Your message is too long. Please keep it under 10,000 characters."]
        );
    }

    #[test]
    fn malformed_conversation_id_is_rejected() {
        let mut form = form("hello");
        form.conversation_id = Some("abc".to_string());
        let errors = validate_send_message(form, &limits()).err().unwrap();
        assert_eq!(errors["conversation_id"], vec!["Invalid conversation ID format."]);
    }

    #[test]
    fn blank_conversation_id_means_new_conversation() {
        let mut form = form("hello");
        form.conversation_id = Some("".to_string());
        let request = validate_send_message(form, &limits()).unwrap();
        assert_eq!(request.conversation_id, None);
    }

    #[test]
    fn non_image_upload_is_rejected() {
        let mut form = form("hello");
        form.image = Some(("application/pdf".to_string(), vec![1, 2, 3]));
        let errors = validate_send_message(form, &limits()).err().unwrap();
        assert_eq!(errors["image"], vec!["The uploaded file must be an image."]);
    }

    #[test]
    fn oversized_image_is_rejected() {
        let mut form = form("hello");
        form.image = Some(("image/png".to_string(), vec![0; 10 * 1024 * 1024 + 1]));
        let errors = validate_send_message(form, &limits()).err().unwrap();
        assert_eq!(errors["image"], vec!["The image size must not exceed 10MB."]);
    }

    #[test]
    fn all_failures_are_collected_at_once() {
        let mut form = SendMessageForm::default();
        form.conversation_id = Some("nope".to_string());
        form.image = Some(("text/plain".to_string(), vec![1]));
        let errors = validate_send_message(form, &limits()).err().unwrap();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn valid_form_is_accepted_and_image_encoded() {
        let mut form = form("hello");
        form.conversation_id = Some("42".to_string());
        form.image = Some(("image/png".to_string(), vec![1, 2, 3]));

        let request = validate_send_message(form, &limits()).unwrap();
        assert_eq!(request.prompt, "hello");
        assert_eq!(request.conversation_id, Some(42));
        let image = request.image.unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data_base64, "AQID");
    }

    #[test]
    fn digit_grouping_matches_client_wording() {
        assert_eq!(group_digits(999), "999");
        assert_eq!(group_digits(10_000), "10,000");
        assert_eq!(group_digits(1_000_000), "1,000,000");
    }

    #[test]
    fn overlong_product_title_is_rejected() {
        let input = ProductInput {
            title: Some("t".repeat(256)),
            category: Some("Electronics".to_string()),
            thumbnail: None,
            price: Some(10.0),
        };
        match validate_product(&input) {
            Err(ApiError::Validation(errors)) => {
                assert_eq!(
                    errors["title"],
                    vec!["The title must not be greater than 255 characters."]
                );
            }
            other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn product_input_requires_title_category_and_price() {
        let input = ProductInput {
            title: None,
            category: Some("  ".to_string()),
            thumbnail: None,
            price: None,
        };
        match validate_product(&input) {
            Err(ApiError::Validation(errors)) => {
                assert_eq!(errors.len(), 3);
                assert_eq!(errors["title"], vec!["The title field is required."]);
            }
            other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
        }
    }
}
