use anyhow::Result;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Router,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use candle_core::{Device, Tensor};
use clap::Parser;
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use omost_core::{
    canvas::extract_code_block, layout_cond, llm::load_llm, render_canvas, Canvas, CanvasError,
    CanvasRegion, ChatRequest, ClipTextEncoder, Conversation, DeviceMap, LayoutParams, LlmLike,
    ParamsError, RegionConditioning,
};
use serde::{Deserialize, Serialize};
use std::{
    io::Cursor,
    sync::{Arc, Mutex},
};
use tokio::{self, net::TcpListener};

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Omost layout conditioning server")]
struct Args {
    /// Use CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Layout model to load
    #[arg(long, default_value = "lllyasviel/omost-llama-3-8b")]
    model: String,

    /// Host address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8000)]
    port: u16,
}

/// Converts a rendered canvas into a base64-encoded PNG.
fn image_to_base64_png(img: &DynamicImage) -> Result<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(BASE64_STANDARD.encode(&bytes))
}

/// A tensor shipped over the wire: shape plus little-endian f32 payload.
#[derive(Serialize)]
struct TensorPayload {
    shape: Vec<usize>,
    data: String,
}

impl TensorPayload {
    fn from_tensor(tensor: &Tensor) -> Result<Self> {
        let shape = tensor.dims().to_vec();
        let values = tensor.flatten_all()?.to_vec1::<f32>()?;
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Ok(Self {
            shape,
            data: BASE64_STANDARD.encode(&bytes),
        })
    }
}

#[derive(Serialize)]
struct ChatResponse {
    conversation: Conversation,
    reply: String,
    code_block: Option<String>,
}

#[derive(Deserialize)]
struct CanvasRequest {
    canvas: Vec<CanvasRegion>,
}

#[derive(Debug, Serialize)]
struct RenderResponse {
    image: String,
}

#[derive(Deserialize)]
struct ConditioningRequest {
    canvas: Vec<CanvasRegion>,
    global_strength: Option<f32>,
    region_strength: Option<f32>,
}

#[derive(Serialize)]
struct RegionConditioningPayload {
    rect: [usize; 4],
    strength: f32,
    cond: TensorPayload,
    pooled: TensorPayload,
    mask: TensorPayload,
}

#[derive(Serialize)]
struct ConditioningResponse {
    regions: Vec<RegionConditioningPayload>,
}

// Application state containing the preloaded models.
#[derive(Clone)]
struct AppState {
    llm: Arc<Mutex<dyn LlmLike>>,
    encoder: Arc<ClipTextEncoder>,
}

/// Validation failures become 400s, everything else a 500.
fn error_response(e: anyhow::Error) -> axum::response::Response {
    let status = if e.downcast_ref::<CanvasError>().is_some()
        || e.downcast_ref::<ParamsError>().is_some()
    {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    log::error!("request failed: {e:?}");
    (status, format!("Error: {e}")).into_response()
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    match run_chat(req, &state) {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

fn run_chat(req: ChatRequest, state: &AppState) -> Result<ChatResponse> {
    let params = req.params();
    let history = req.conversation.clone().unwrap_or_default();
    let mut llm = state
        .llm
        .lock()
        .map_err(|_| anyhow::anyhow!("model mutex poisoned"))?;
    let outcome = llm.chat(&history, &req.text, &params)?;
    let code_block = extract_code_block(&outcome.reply).map(str::to_string);
    Ok(ChatResponse {
        conversation: outcome.conversation,
        reply: outcome.reply,
        code_block,
    })
}

async fn render_handler(Json(req): Json<CanvasRequest>) -> impl IntoResponse {
    match run_render(req) {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

fn run_render(req: CanvasRequest) -> Result<RenderResponse> {
    let canvas = Canvas::new(req.canvas)?;
    let image = render_canvas(&canvas);
    Ok(RenderResponse {
        image: image_to_base64_png(&image)?,
    })
}

async fn conditioning_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConditioningRequest>,
) -> impl IntoResponse {
    match run_conditioning(req, &state) {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

fn run_conditioning(req: ConditioningRequest, state: &AppState) -> Result<ConditioningResponse> {
    let canvas = Canvas::new(req.canvas)?;
    let defaults = LayoutParams::default();
    let params = LayoutParams {
        global_strength: req.global_strength.unwrap_or(defaults.global_strength),
        region_strength: req.region_strength.unwrap_or(defaults.region_strength),
    };
    let conds = layout_cond(state.encoder.as_ref(), &canvas, &params)?;

    let mut regions = Vec::with_capacity(conds.len());
    for (region, cond) in canvas.regions().iter().zip(&conds) {
        regions.push(region_payload(region, cond)?);
    }
    Ok(ConditioningResponse { regions })
}

fn region_payload(
    region: &CanvasRegion,
    cond: &RegionConditioning,
) -> Result<RegionConditioningPayload> {
    Ok(RegionConditioningPayload {
        rect: region.rect.into(),
        strength: cond.strength,
        cond: TensorPayload::from_tensor(&cond.cond)?,
        pooled: TensorPayload::from_tensor(&cond.pooled)?,
        mask: TensorPayload::from_tensor(&cond.mask.to_tensor(&Device::Cpu)?)?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let device_map = if args.cpu {
        DeviceMap::ForceCpu
    } else {
        DeviceMap::default()
    };

    let api = Api::new()?;
    let llm = load_llm(&args.model, api.clone(), device_map).await?;
    let encoder = ClipTextEncoder::load(&api, device_map).await?;

    // Build application state and wrap in Arc.
    let app_state = AppState {
        llm,
        encoder: Arc::new(encoder),
    };
    let shared_state = Arc::new(app_state);

    // --- Build axum router with shared state ---
    let app = Router::new()
        .route("/v1/chat", post(chat_handler))
        .route("/v1/canvas/render", post(render_handler))
        .route("/v1/canvas/conditioning", post(conditioning_handler))
        .with_state(shared_state);

    // --- Start the server ---
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("started server on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_payload_encodes_le_f32() {
        let tensor = Tensor::new(&[1.0f32, 2.0], &Device::Cpu).unwrap();
        let payload = TensorPayload::from_tensor(&tensor).unwrap();
        assert_eq!(payload.shape, vec![2]);
        let bytes = BASE64_STANDARD.decode(payload.data).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(bytes[4..8].try_into().unwrap()), 2.0);
    }

    #[test]
    fn render_request_round_trips_to_png() {
        let req = CanvasRequest {
            canvas: serde_json::from_str(
                r#"[{"rect":[0,90,0,90],"prefixes":[],"suffixes":["scene"]}]"#,
            )
            .unwrap(),
        };
        let response = run_render(req).unwrap();
        let png = BASE64_STANDARD.decode(response.image).unwrap();
        // PNG magic bytes.
        assert_eq!(&png[0..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn empty_canvas_render_is_a_canvas_error() {
        let req = CanvasRequest { canvas: vec![] };
        let err = run_render(req).unwrap_err();
        assert!(err.downcast_ref::<CanvasError>().is_some());
    }
}
