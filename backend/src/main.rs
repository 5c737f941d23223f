use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use formula_core::calc::{CalcStack, FieldValue, IntegrationKind, StackMachine};
use formula_core::units::UnitTable;
use formula_core::variables::{format_quantity, Evaluator, MemoryBackend, VariableStore};
use num_complex::Complex64;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_SETUP: &str = "Setup1";

/// Format a failed command as a JSON message for the client
fn format_error(code: &str, message: &str, severity: &str) -> String {
    format!("ERROR_UPDATE:{}", json!({
        "code": code,
        "message": message,
        "severity": severity
    }))
}

// Application State
struct AppState {
    store: Arc<RwLock<VariableStore<MemoryBackend>>>,
    units: Arc<UnitTable>,
    default_setup: String,
}

#[derive(Debug)]
struct CommandError {
    code: &'static str,
    message: String,
}

impl CommandError {
    fn new(code: &'static str, message: impl ToString) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let addr: SocketAddr = std::env::var("FORMULA_BRIDGE_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;
    let default_setup = std::env::var("FORMULA_DEFAULT_SETUP").unwrap_or_else(|_| DEFAULT_SETUP.to_string());

    let shared_state = Arc::new(AppState {
        store: Arc::new(RwLock::new(VariableStore::new(MemoryBackend::new()))),
        units: Arc::new(UnitTable::standard()),
        default_setup,
    });

    let app = Router::new()
        .route("/", get(root))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state);

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn root() -> &'static str {
    "Hello from Formula Bridge!"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let session = Uuid::new_v4();
    info!(%session, "Client connected");

    // Each session drives its own calculator; variables are shared.
    let mut machine = StackMachine::with_setup(&state.default_setup);

    while let Some(msg) = socket.recv().await {
        let msg = if let Ok(msg) = msg {
            msg
        } else {
            return;
        };

        if let Message::Text(text) = msg {
            info!(%session, "Received message: {}", text);

            let reply = match handle_command(&text, &state, &mut machine) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(%session, code = e.code, "Command failed: {}", e.message);
                    format_error(e.code, &e.message, "error")
                }
            };

            if socket.send(Message::Text(reply)).await.is_err() {
                return;
            }
        }
    }

    info!(%session, "Client disconnected");
}

#[derive(Deserialize)]
struct VariableSetCmd {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct EvalCmd {
    expression: String,
    #[serde(default)]
    unit: String,
}

#[derive(Deserialize)]
struct ComplexWire {
    re: f64,
    #[serde(default)]
    im: f64,
}

impl From<&ComplexWire> for Complex64 {
    fn from(c: &ComplexWire) -> Self {
        Complex64::new(c.re, c.im)
    }
}

/// `2.0`, `{"re": 1, "im": -1}` or a 3-vector of complex components
#[derive(Deserialize)]
#[serde(untagged)]
enum FieldInput {
    Real(f64),
    Complex(ComplexWire),
    Vector([ComplexWire; 3]),
}

impl From<&FieldInput> for FieldValue {
    fn from(input: &FieldInput) -> Self {
        match input {
            FieldInput::Real(v) => FieldValue::real(*v),
            FieldInput::Complex(c) => FieldValue::Scalar(c.into()),
            FieldInput::Vector([x, y, z]) => FieldValue::Vector([x.into(), y.into(), z.into()]),
        }
    }
}

#[derive(Deserialize)]
struct FieldDefineCmd {
    name: String,
    #[serde(default = "default_mode")]
    mode: u32,
    value: FieldInput,
}

#[derive(Deserialize)]
struct EntityDefineCmd {
    name: String,
    kind: IntegrationKind,
    measure: f64,
}

#[derive(Deserialize)]
struct CalcSaveCmd {
    program: CalcStack,
    name: String,
}

#[derive(Deserialize)]
struct CalcEvalCmd {
    program: CalcStack,
    #[serde(default = "default_mode")]
    mode: u32,
    #[serde(default)]
    phase: i32,
}

fn default_mode() -> u32 {
    1
}

fn parse_args<'a, T: Deserialize<'a>>(code: &'static str, json_str: &'a str) -> Result<T, CommandError> {
    serde_json::from_str(json_str).map_err(|e| CommandError::new(code, format!("Invalid command payload: {}", e)))
}

/// Run one text command and build the reply.
fn handle_command(text: &str, state: &AppState, machine: &mut StackMachine) -> Result<String, CommandError> {
    if let Some(json_str) = text.strip_prefix("VARIABLE_SET:") {
        let cmd: VariableSetCmd = parse_args("VARIABLE_SET_FAILED", json_str)?;
        let mut store = state
            .store
            .write()
            .map_err(|_| CommandError::new("STATE_UNAVAILABLE", "variable store lock poisoned"))?;
        store
            .set(&cmd.name, cmd.value.as_str())
            .map_err(|e| CommandError::new("VARIABLE_SET_FAILED", e))?;
        let var = store
            .get(&cmd.name)
            .map_err(|e| CommandError::new("VARIABLE_SET_FAILED", e))?;
        info!("Set variable {} = {}", var.name, var.value);
        Ok(format!("VARIABLE_UPDATE:{}", json!(var)))
    } else if text == "VARIABLE_LIST" {
        let store = state
            .store
            .read()
            .map_err(|_| CommandError::new("STATE_UNAVAILABLE", "variable store lock poisoned"))?;
        let vars = store
            .variables()
            .map_err(|e| CommandError::new("VARIABLE_LIST_FAILED", e))?;
        Ok(format!("VARIABLES:{}", json!(vars)))
    } else if let Some(json_str) = text.strip_prefix("EVAL:") {
        let cmd: EvalCmd = parse_args("EVAL_FAILED", json_str)?;
        let store = state
            .store
            .read()
            .map_err(|_| CommandError::new("STATE_UNAVAILABLE", "variable store lock poisoned"))?;
        let value = Evaluator::new(&*store, &*state.units)
            .evaluate(&cmd.expression, &cmd.unit)
            .map_err(|e| CommandError::new("EVAL_FAILED", e))?;
        Ok(format!(
            "EVAL_RESULT:{}",
            json!({ "value": value, "formatted": format_quantity(value, &cmd.unit) })
        ))
    } else if let Some(json_str) = text.strip_prefix("FIELD_DEFINE:") {
        let cmd: FieldDefineCmd = parse_args("FIELD_DEFINE_FAILED", json_str)?;
        if cmd.mode == 0 {
            return Err(CommandError::new("FIELD_DEFINE_FAILED", "modes are numbered from 1"));
        }
        machine.define_field(&cmd.name, cmd.mode, (&cmd.value).into());
        Ok(format!("FIELD_DEFINED:{}", json!({ "name": cmd.name })))
    } else if let Some(json_str) = text.strip_prefix("ENTITY_DEFINE:") {
        let cmd: EntityDefineCmd = parse_args("ENTITY_DEFINE_FAILED", json_str)?;
        machine.define_entity(cmd.kind, &cmd.name, cmd.measure);
        Ok(format!("ENTITY_DEFINED:{}", json!({ "name": cmd.name })))
    } else if let Some(json_str) = text.strip_prefix("CALC_SAVE:") {
        let cmd: CalcSaveCmd = parse_args("CALC_SAVE_FAILED", json_str)?;
        machine.clear_stack();
        let saved = cmd
            .program
            .save_as(machine, &cmd.name)
            .map_err(|e| CommandError::new("CALC_SAVE_FAILED", e))?;
        info!("Saved named expression {} ({} ops)", cmd.name, cmd.program.len());
        Ok(format!("CALC_SAVED:{}", json!({ "name": cmd.name, "program": saved })))
    } else if let Some(json_str) = text.strip_prefix("CALC_EVAL:") {
        let cmd: CalcEvalCmd = parse_args("CALC_EVAL_FAILED", json_str)?;
        machine.clear_stack();
        let value = cmd
            .program
            .evaluate(machine, cmd.mode, cmd.phase)
            .map_err(|e| CommandError::new("CALC_EVAL_FAILED", e))?;
        Ok(format!("CALC_RESULT:{}", json!({ "value": value })))
    } else {
        Err(CommandError::new("UNKNOWN_COMMAND", format!("Unknown command: {}", text)))
    }
}

#[cfg(test)]
mod bridge_tests {
    use super::*;

    fn state() -> AppState {
        AppState {
            store: Arc::new(RwLock::new(VariableStore::new(MemoryBackend::new()))),
            units: Arc::new(UnitTable::standard()),
            default_setup: DEFAULT_SETUP.to_string(),
        }
    }

    fn reply(text: &str, state: &AppState, machine: &mut StackMachine) -> serde_json::Value {
        let out = handle_command(text, state, machine).unwrap();
        let (_, payload) = out.split_once(':').unwrap();
        serde_json::from_str(payload).unwrap()
    }

    #[test]
    fn test_variables_and_eval() {
        let state = state();
        let mut machine = StackMachine::with_setup(DEFAULT_SETUP);

        let update = reply(r#"VARIABLE_SET:{"name":"w","value":"2mm"}"#, &state, &mut machine);
        assert_eq!(update["value"], "2mm");
        reply(r#"VARIABLE_SET:{"name":"l","value":"(w)*(3)"}"#, &state, &mut machine);

        let vars = reply("VARIABLE_LIST", &state, &mut machine);
        assert_eq!(vars[1]["value"], "w * 3");

        let result = reply(r#"EVAL:{"expression":"l","unit":"um"}"#, &state, &mut machine);
        assert_eq!(result["formatted"], "6000.0um");
    }

    #[test]
    fn test_calc_eval() {
        let state = state();
        let mut machine = StackMachine::with_setup(DEFAULT_SETUP);

        reply(r#"FIELD_DEFINE:{"name":"Mag_E","value":3.0}"#, &state, &mut machine);
        reply(r#"ENTITY_DEFINE:{"name":"box","kind":"Vol","measure":2.0}"#, &state, &mut machine);

        let program = r#"[{"op":"PushNamed","arg":"Mag_E"},{"op":"PushVol","arg":"box"},{"op":"Combine","arg":"Integrate"}]"#;
        let result = reply(&format!(r#"CALC_EVAL:{{"program":{}}}"#, program), &state, &mut machine);
        assert_eq!(result["value"], 6.0);

        let saved = reply(
            &format!(r#"CALC_SAVE:{{"program":{},"name":"E_int"}}"#, program),
            &state,
            &mut machine,
        );
        assert_eq!(saved["program"][0]["arg"], "E_int");
    }

    #[test]
    fn test_errors_are_reported() {
        let state = state();
        let mut machine = StackMachine::with_setup(DEFAULT_SETUP);

        let err = handle_command(r#"EVAL:{"expression":"missing"}"#, &state, &mut machine).unwrap_err();
        assert_eq!(err.code, "EVAL_FAILED");

        let err = handle_command("NOPE", &state, &mut machine).unwrap_err();
        assert_eq!(err.code, "UNKNOWN_COMMAND");

        let msg = format_error(err.code, &err.message, "error");
        assert!(msg.starts_with("ERROR_UPDATE:"));
    }
}
