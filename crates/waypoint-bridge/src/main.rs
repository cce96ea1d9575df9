use async_trait::async_trait;
use clap::Parser;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use waypoint_bridge::{router, AppState, BridgeHub, RunGate};
use waypoint_contract::{
    json_map, AgentContextSnapshot, Directive, MasterPlan, Planner, PlannerError, PlannerResult,
    PlanItem, ReflectionInput, ReflectionResult, Reflector, ReflectorError, RetryPolicy,
    RetryStrategy, ToolAdapter, ToolChoice, ToolDescriptor, ToolError, ToolInput, ToolResult,
    TypedToolAdapter,
};
use waypoint_runtime::{AgentRuntime, Broadcast, EventBus, GuardConfig, ToolRegistry};

#[derive(Debug, Parser)]
#[command(name = "waypoint-bridge")]
struct Args {
    #[arg(long, env = "WAYPOINT_HTTP_ADDR", default_value = "127.0.0.1:3030")]
    http_addr: String,

    /// Root directory file-oriented tools are confined to.
    #[arg(long, env = "WAYPOINT_WORKSPACE_ROOT", default_value = ".")]
    workspace_root: PathBuf,

    #[arg(long, env = "WAYPOINT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Config {
    guards: Option<GuardConfig>,
    default_tool: Option<String>,
}

/// Deterministic single-step planner used until a reasoning planner is
/// plugged in: one step per root task, routed through the default tool.
struct SingleStepPlanner {
    default_tool: String,
}

#[async_trait]
impl Planner for SingleStepPlanner {
    async fn plan(&self, snapshot: AgentContextSnapshot) -> Result<PlannerResult, PlannerError> {
        let root = snapshot
            .root_task()
            .ok_or_else(|| PlannerError::Failed("context has no root task".to_string()))?;
        let step = PlanItem::new("step-1", root.description.clone())
            .with_task(root.task_id.clone())
            .with_tool(
                ToolChoice::new(&self.default_tool)
                    .with_parameters(json_map(json!({ "goal": root.description }))),
            )
            .with_criterion("tool reported success")
            .with_retry(RetryPolicy::new(2, RetryStrategy::Exponential, 250));
        let plan = MasterPlan::new(vec![step]).with_reasoning("single-step default plan");
        Ok(PlannerResult::new(plan))
    }
}

/// Outcome-driven reflector: complete on success, retry within the step's
/// retry budget (honouring its backoff), abort once the budget is spent.
struct OutcomeReflector;

#[async_trait]
impl Reflector for OutcomeReflector {
    async fn reflect(&self, input: ReflectionInput) -> Result<ReflectionResult, ReflectorError> {
        let succeeded = input
            .observation
            .as_ref()
            .map(|obs| obs.success)
            .unwrap_or(false);
        let mut plan = input.plan;

        if succeeded {
            plan.set_step_status(&input.current_step.id, waypoint_contract::StepStatus::Succeeded);
            plan.set_status(waypoint_contract::PlanStatus::Completed);
            return Ok(ReflectionResult::new(Directive::Complete, plan)
                .with_message("success criteria satisfied"));
        }

        let retry = input.current_step.retry.clone().unwrap_or_default();
        let budget = retry.limit.unwrap_or(1);
        if input.attempt <= budget {
            tokio::time::sleep(retry.delay_for(input.attempt)).await;
            return Ok(ReflectionResult::new(Directive::Retry, plan)
                .with_message(format!("retrying after attempt {}", input.attempt)));
        }

        plan.set_step_status(&input.current_step.id, waypoint_contract::StepStatus::Failed);
        plan.set_status(waypoint_contract::PlanStatus::Aborted);
        Ok(ReflectionResult::new(Directive::Abort, plan).with_message("retries exhausted"))
    }
}

/// Echoes its goal back.
struct EchoTool;

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoParams {
    #[serde(default)]
    goal: Option<String>,
}

#[async_trait]
impl TypedToolAdapter for EchoTool {
    type Params = EchoParams;

    fn tool_id(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the goal parameter back as output"
    }

    async fn execute(
        &self,
        params: EchoParams,
        _input: &ToolInput,
    ) -> Result<ToolResult, ToolError> {
        let goal = params.goal.unwrap_or_default();
        Ok(ToolResult::ok(json_map(json!({ "echo": goal }))))
    }
}

/// Reports wall-clock time; handy for liveness checks from the debugger.
struct ClockTool;

#[async_trait]
impl ToolAdapter for ClockTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("clock", "Returns the current unix time in milliseconds")
    }

    async fn execute(&self, _input: ToolInput) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok(json_map(json!({
            "nowMs": waypoint_contract::now_millis()
        }))))
    }
}

/// Reads a file confined to the workspace root.
struct ReadFileTool {
    root: PathBuf,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadFileParams {
    path: String,
}

impl ReadFileTool {
    /// Resolve `requested` inside the workspace root, refusing escapes.
    fn resolve(&self, requested: &str) -> Result<PathBuf, ToolError> {
        let joined = self.root.join(requested);
        let canonical = joined
            .canonicalize()
            .map_err(|e| ToolError::ExecutionFailed(format!("cannot resolve {requested}: {e}")))?;
        let root = self
            .root
            .canonicalize()
            .map_err(|e| ToolError::Internal(format!("workspace root unusable: {e}")))?;
        if !canonical.starts_with(&root) {
            return Err(ToolError::Denied(format!(
                "path escapes the workspace root: {requested}"
            )));
        }
        Ok(canonical)
    }
}

#[async_trait]
impl TypedToolAdapter for ReadFileTool {
    type Params = ReadFileParams;

    fn tool_id(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a UTF-8 file from inside the workspace root"
    }

    async fn execute(
        &self,
        params: ReadFileParams,
        _input: &ToolInput,
    ) -> Result<ToolResult, ToolError> {
        let path = match self.resolve(&params.path) {
            Ok(path) => path,
            Err(ToolError::Denied(message)) => return Ok(ToolResult::fail(message)),
            Err(other) => return Ok(ToolResult::fail(other.to_string())),
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(ToolResult::ok(json_map(json!({
                "path": params.path,
                "content": content,
            })))),
            Err(e) => Ok(ToolResult::fail(format!("read failed: {e}"))),
        }
    }
}

/// Always fails; lets a debugger exercise the retry/abort trajectory.
struct FailingTool;

#[async_trait]
impl ToolAdapter for FailingTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("failing", "Always fails, for exercising error handling")
    }

    async fn execute(&self, _input: ToolInput) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::fail("this tool always fails"))
    }
}

fn build_registry(workspace_root: &Path) -> ToolRegistry {
    let registry = ToolRegistry::new();
    let tools: Vec<Arc<dyn ToolAdapter>> = vec![
        Arc::new(EchoTool),
        Arc::new(ClockTool),
        Arc::new(ReadFileTool {
            root: workspace_root.to_path_buf(),
        }),
        Arc::new(FailingTool),
    ];
    for tool in tools {
        if let Err(e) = registry.register(tool) {
            eprintln!("tool registration failed: {e}");
            std::process::exit(2);
        }
    }
    registry
}

fn load_config(path: Option<&Path>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("failed to read config {}: {e}", path.display());
            std::process::exit(2);
        }
    };
    match serde_json::from_str::<Config>(&raw) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to parse config (JSON): {e}");
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref());

    let guards = config.guards.unwrap_or_else(|| {
        GuardConfig::default()
            .with_max_iterations(25)
            .with_max_failures(3)
    });
    let default_tool = config.default_tool.unwrap_or_else(|| "echo".to_string());

    let bus = EventBus::new();
    let snapshots: Broadcast<AgentContextSnapshot> = Broadcast::new();
    let hub = BridgeHub::new();
    hub.spawn_forwarders(&bus, &snapshots);

    let runtime = AgentRuntime::new(
        Arc::new(SingleStepPlanner { default_tool }),
        Arc::new(OutcomeReflector),
        build_registry(&args.workspace_root),
        bus,
        snapshots,
    )
    .with_guards(guards);

    let app = router(AppState {
        hub,
        gate: Arc::new(RunGate::new(runtime)),
    });

    let listener = match tokio::net::TcpListener::bind(&args.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind {}: {e}", args.http_addr);
            std::process::exit(2);
        }
    };
    tracing::info!(addr = %args.http_addr, "waypoint bridge listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    {
        eprintln!("http server crashed: {e}");
        std::process::exit(1);
    }
}
