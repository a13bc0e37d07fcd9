//! 自动化主循环。
//!
//! 每一轮：按顺序执行已启用且冷却完毕的动作，没有动作运行时做一次空闲截图，
//! 处理一次性触发的命令，可选地执行修复动作，最后进行可中断的休眠。
//! 每个动作开始前以及处理函数内部的每次停止检查都会顺带执行命令队列中的待处理命令。

pub mod controller;
pub mod cooldown;
pub mod registry;

pub use controller::AutomationController;
pub use cooldown::{format_cooldown, Cooldowns};
pub use registry::{ActionHandler, ActionTable, CommandHandler, CommandTable, HandlerTable};

use crate::errors::{SessionError, SessionResult};
use crate::needles::{best_match, find_matches, pixel_color, NeedleMatch, NeedleSet, Region};
use crate::queue::CommandQueue;
use crate::session::{DeviceSession, Gesture, DEFAULT_SWIPE_DURATION_MS, UNSET};
use crate::utils::lock_unpoisoned;
use image::{Rgb, RgbaImage};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const STOP_REASON: &str = "Bot execution stopped by user";

/// 动作处理函数的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// 正常运行，开始冷却
    Ran,
    /// 运行完毕且不需要再运行，开始冷却并自动取消启用
    Completed,
    /// 实际上没有运行，不开始冷却
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail")]
pub enum LoopStatus {
    Running(String),
    Stopped,
    Error(String),
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStatus::Running(detail) if detail.is_empty() => f.write_str("Running"),
            LoopStatus::Running(detail) => write!(f, "Running: {}", detail),
            LoopStatus::Stopped => f.write_str("Stopped"),
            LoopStatus::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// 一个自动化实例的静态配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopPlan {
    /// 动作标识，按执行顺序
    pub actions: Vec<String>,
    /// 可被一次性触发的命令标识
    pub commands: Vec<String>,
    /// 初始启用的动作，缺省时全部启用
    pub enabled: Option<Vec<String>>,
    /// 冷却时间（秒），未列出的动作没有冷却
    pub cooldowns: HashMap<String, u64>,
    pub sleep_seconds: f64,
    pub fix_enabled: bool,
    /// 动作出错后暂停的时间
    pub error_pause_ms: u64,
}

impl Default for LoopPlan {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            commands: Vec::new(),
            enabled: None,
            cooldowns: HashMap::new(),
            sleep_seconds: 0.0,
            fix_enabled: false,
            error_pause_ms: 1000,
        }
    }
}

impl LoopPlan {
    pub fn from_json(text: &str) -> SessionResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn error_pause(&self) -> Duration {
        Duration::from_millis(self.error_pause_ms)
    }
}

struct ControlState {
    enabled: HashMap<String, bool>,
    triggers: HashSet<String>,
    fix_enabled: bool,
    sleep_seconds: f64,
    status: LoopStatus,
    cooldowns: Cooldowns,
}

/// 循环与远程界面共享的可变控制项
pub struct LoopControls {
    state: Mutex<ControlState>,
    skip: AtomicBool,
}

impl LoopControls {
    pub fn from_plan(plan: &LoopPlan) -> Self {
        let enabled = plan
            .actions
            .iter()
            .map(|id| {
                let on = plan
                    .enabled
                    .as_ref()
                    .map_or(true, |enabled| enabled.contains(id));
                (id.clone(), on)
            })
            .collect();
        Self {
            state: Mutex::new(ControlState {
                enabled,
                triggers: HashSet::new(),
                fix_enabled: plan.fix_enabled,
                sleep_seconds: plan.sleep_seconds,
                status: LoopStatus::Stopped,
                cooldowns: Cooldowns::from_secs(&plan.cooldowns),
            }),
            skip: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) {
        lock_unpoisoned(&self.state)
            .enabled
            .insert(id.to_string(), enabled);
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        lock_unpoisoned(&self.state)
            .enabled
            .get(id)
            .copied()
            .unwrap_or(false)
    }

    /// 请求在下一轮执行一次命令
    pub fn trigger(&self, id: &str) {
        lock_unpoisoned(&self.state).triggers.insert(id.to_string());
    }

    /// 读取并清除触发标志
    pub fn take_trigger(&self, id: &str) -> bool {
        lock_unpoisoned(&self.state).triggers.remove(id)
    }

    pub fn set_fix_enabled(&self, enabled: bool) {
        lock_unpoisoned(&self.state).fix_enabled = enabled;
    }

    pub fn fix_enabled(&self) -> bool {
        lock_unpoisoned(&self.state).fix_enabled
    }

    pub fn set_sleep_seconds(&self, seconds: f64) {
        lock_unpoisoned(&self.state).sleep_seconds = seconds;
    }

    pub fn sleep_seconds(&self) -> f64 {
        lock_unpoisoned(&self.state).sleep_seconds
    }

    /// 跳过本轮剩余的动作和修复步骤
    pub fn request_skip(&self) {
        self.skip.store(true, Ordering::SeqCst);
    }

    pub fn skip_requested(&self) -> bool {
        self.skip.load(Ordering::SeqCst)
    }

    fn clear_skip(&self) {
        self.skip.store(false, Ordering::SeqCst);
    }

    pub fn status(&self) -> LoopStatus {
        lock_unpoisoned(&self.state).status.clone()
    }

    pub fn set_status(&self, status: LoopStatus) {
        debug!(%status, "loop status");
        lock_unpoisoned(&self.state).status = status;
    }

    pub fn cooldown_ready(&self, id: &str) -> bool {
        lock_unpoisoned(&self.state).cooldowns.is_ready(id)
    }

    pub fn mark_ran(&self, id: &str) {
        lock_unpoisoned(&self.state).cooldowns.mark_ran(id);
    }

    /// 界面显示用的剩余冷却，例如 `45s`、`5m`；已就绪时为 `None`
    pub fn cooldown_label(&self, id: &str) -> Option<String> {
        let remaining = lock_unpoisoned(&self.state).cooldowns.remaining(id);
        if remaining.as_secs() == 0 {
            return None;
        }
        Some(format_cooldown(remaining))
    }
}

/// 模板查找参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FindOptions {
    /// 置信度必须严格大于它才算命中
    pub accuracy: f32,
    pub tap: bool,
    pub offset_x: i32,
    pub offset_y: i32,
    pub region: Option<Region>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            accuracy: 0.9,
            tap: true,
            offset_x: 0,
            offset_y: 0,
            region: None,
        }
    }
}

/// 动作和命令处理函数拿到的上下文
pub struct BotContext<'a> {
    session: &'a Arc<DeviceSession>,
    queue: &'a Arc<CommandQueue>,
    controls: &'a Arc<LoopControls>,
    needles: &'a NeedleSet,
}

impl<'a> BotContext<'a> {
    /// 停止时返回停止信号；否则在当前线程上执行排队的外部命令
    pub fn check_should_stop(&self) -> SessionResult<()> {
        self.session.cancellation().check(STOP_REASON)?;
        if self.queue.is_inline_drain() {
            self.queue.drain_now()?;
        }
        Ok(())
    }

    pub fn tap(&self, x: i32, y: i32) -> SessionResult<()> {
        self.check_should_stop()?;
        self.session.tap(x, y)
    }

    pub fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> SessionResult<()> {
        self.check_should_stop()?;
        self.session.swipe(x1, y1, x2, y2, duration_ms)
    }

    pub fn screenshot(&self) -> SessionResult<RgbaImage> {
        self.session.capture_screen()
    }

    /// 输入文本并回车
    pub fn type_text(&self, text: &str) -> SessionResult<()> {
        self.check_should_stop()?;
        self.session.send_text(text)
    }

    pub fn press_enter(&self) -> SessionResult<()> {
        self.session.press_enter()
    }

    pub fn press_backspace(&self, count: u32) -> SessionResult<()> {
        self.session.press_backspace(count)
    }

    pub fn log(&self, message: &str) {
        self.session.log(message);
    }

    pub fn log_image(&self, message: &str, image: &RgbaImage) {
        self.session.log_image(message, image);
    }

    pub fn queue_command<F, S>(&self, action: F, description: S)
    where
        F: FnOnce() -> SessionResult<()> + Send + 'static,
        S: Into<String>,
    {
        self.queue.queue_command(action, description);
    }

    pub fn needle(&self, name: &str) -> Option<&RgbaImage> {
        self.needles.get(name)
    }

    fn require_needle(&self, name: &str) -> SessionResult<&RgbaImage> {
        self.needles.get(name).ok_or_else(|| {
            SessionError::config(format!(
                "Needle '{}' not found ({} loaded)",
                name,
                self.needles.len()
            ))
        })
    }

    /// 截图中查找模板，命中且 `tap` 为 true 时点击模板左上角
    pub fn find_and_click(&self, name: &str, accuracy: f32, tap: bool) -> SessionResult<bool> {
        let options = FindOptions {
            accuracy,
            tap,
            ..FindOptions::default()
        };
        Ok(self.find_with(name, &options, None)?.is_some())
    }

    /// 查找模板，返回命中位置（已加上偏移）。
    ///
    /// `screenshot` 为 `None` 时先截一张新图；同一张截图可以传给多次查找。
    pub fn find_with(
        &self,
        name: &str,
        options: &FindOptions,
        screenshot: Option<&RgbaImage>,
    ) -> SessionResult<Option<(i32, i32)>> {
        self.check_should_stop()?;
        let needle = self.require_needle(name)?;
        let captured;
        let screen = match screenshot {
            Some(screen) => screen,
            None => {
                captured = self.screenshot()?;
                &captured
            }
        };

        let best = best_match(screen, needle, options.region);
        let percent = best.map_or(0.0, |hit| hit.confidence * 100.0);
        let hit = match best {
            Some(hit) if hit.confidence > options.accuracy => hit,
            _ => {
                debug!(device = self.device_name(), "NO TAP {} acc:{:.2}%", name, percent);
                return Ok(None);
            }
        };

        let x = hit.x as i32 + options.offset_x;
        let y = hit.y as i32 + options.offset_y;
        if options.tap {
            self.log(&format!("TAP {} at ({}, {}) acc:{:.2}%", name, x, y, percent));
            self.session
                .touch(x, y, UNSET, UNSET, DEFAULT_SWIPE_DURATION_MS, true)?;
        } else {
            self.log(&format!("FOUND {} acc:{:.2}%", name, percent));
        }
        Ok(Some((x, y)))
    }

    /// 查找模板的全部出现位置，按置信度从高到低
    pub fn find_all(
        &self,
        name: &str,
        accuracy: f32,
        region: Option<Region>,
        screenshot: Option<&RgbaImage>,
    ) -> SessionResult<Vec<NeedleMatch>> {
        self.check_should_stop()?;
        let needle = self.require_needle(name)?;
        let matches = match screenshot {
            Some(screen) => find_matches(screen, needle, accuracy, region),
            None => find_matches(&self.screenshot()?, needle, accuracy, region),
        };
        debug!(
            device = self.device_name(),
            "FIND_ALL found {} instances of {}",
            matches.len(),
            name
        );
        Ok(matches)
    }

    pub fn pixel_color(&self, screenshot: &RgbaImage, x: u32, y: u32) -> Option<Rgb<u8>> {
        pixel_color(screenshot, x, y)
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        self.session
    }

    pub fn controls(&self) -> &LoopControls {
        self.controls
    }

    pub fn device_name(&self) -> &str {
        self.session.device_name()
    }
}

pub struct AutomationLoop {
    session: Arc<DeviceSession>,
    queue: Arc<CommandQueue>,
    controls: Arc<LoopControls>,
    actions: Vec<(String, ActionHandler)>,
    commands: Vec<(String, CommandHandler)>,
    fix: Option<CommandHandler>,
    plan: LoopPlan,
    needles: Arc<NeedleSet>,
}

impl AutomationLoop {
    /// 按计划绑定处理函数。计划中引用了未注册的标识时返回配置错误。
    pub fn new(
        session: Arc<DeviceSession>,
        plan: LoopPlan,
        actions: &HandlerTable<ActionHandler>,
        commands: &HandlerTable<CommandHandler>,
    ) -> SessionResult<Self> {
        let bound_actions = actions.bind(&plan.actions, "action")?;
        let bound_commands = commands.bind(&plan.commands, "command")?;
        let unknown = plan
            .enabled
            .iter()
            .flatten()
            .chain(plan.cooldowns.keys())
            .find(|id| !plan.actions.contains(id));
        if let Some(id) = unknown {
            return Err(SessionError::config(format!(
                "'{}' is not one of the configured actions",
                id
            )));
        }

        let queue = Arc::new(CommandQueue::new(session.device_name(), session.sink()));
        Ok(Self {
            controls: Arc::new(LoopControls::from_plan(&plan)),
            queue,
            session,
            actions: bound_actions,
            commands: bound_commands,
            fix: None,
            plan,
            needles: Arc::new(NeedleSet::default()),
        })
    }

    /// 修复/恢复动作，启用 fix 时每轮执行一次
    pub fn with_fix<F>(mut self, handler: F) -> Self
    where
        F: Fn(&BotContext<'_>) -> SessionResult<()> + Send + Sync + 'static,
    {
        self.fix = Some(Arc::new(handler));
        self
    }

    /// 从目录加载模板图片，同一目录在进程内只读一次
    pub fn with_needles(mut self, folder: &Path) -> SessionResult<Self> {
        self.needles = self.session.context().needles().load(folder)?;
        Ok(self)
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn controls(&self) -> &Arc<LoopControls> {
        &self.controls
    }

    pub fn command_queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    pub fn name(&self) -> &str {
        self.session.device_name()
    }

    /// 通过命令队列送达跳过请求，在下一次停止检查时生效
    pub fn queue_skip(&self) {
        let controls = Arc::clone(&self.controls);
        self.queue.queue_command(
            move || {
                controls.request_skip();
                Ok(())
            },
            "Skip current iteration",
        );
    }

    /// 远程界面提交的点击或滑动
    pub fn queue_touch(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) {
        let session = Arc::clone(&self.session);
        let description = Gesture::resolve(x1, y1, x2, y2, duration_ms).describe();
        self.queue.queue_command(
            move || session.touch(x1, y1, x2, y2, duration_ms, true),
            description,
        );
    }

    /// 连接设备并运行直到停止，返回最终状态
    pub fn run(&self) -> LoopStatus {
        self.controls
            .set_status(LoopStatus::Running("Connecting".to_string()));
        if let Err(e) = self.session.connect() {
            self.session.log(&format!("ERROR: {}", e));
            let status = LoopStatus::Error(e.to_string());
            self.controls.set_status(status.clone());
            return status;
        }

        // 运行期间命令只在停止检查时执行
        self.queue.set_inline_drain(true);
        self.queue.stop();
        let token = self.session.cancellation();
        while !token.is_cancelled() {
            match self.run_pass() {
                Ok(()) => {}
                Err(e) if e.is_stop_signal() => {
                    self.session.log(&format!("Loop stopped: {}", e));
                    break;
                }
                Err(e) => {
                    self.controls.set_status(LoopStatus::Error(e.to_string()));
                    self.session.log(&format!("ERROR: {}", e));
                    if self.pause_after_error().is_err() {
                        break;
                    }
                }
            }
        }
        self.queue.set_inline_drain(false);
        self.controls.set_status(LoopStatus::Stopped);
        LoopStatus::Stopped
    }

    /// 在循环之外调用处理函数或查找模板时使用
    pub fn context(&self) -> BotContext<'_> {
        BotContext {
            session: &self.session,
            queue: &self.queue,
            controls: &self.controls,
            needles: &self.needles,
        }
    }

    fn running(&self, detail: String) {
        self.controls.set_status(LoopStatus::Running(detail));
    }

    fn pause_after_error(&self) -> SessionResult<()> {
        let token = self.session.cancellation();
        token.sleep_with(self.plan.error_pause(), || token.check(STOP_REASON))
    }

    /// 一轮循环。只有停止信号会作为错误返回。
    fn run_pass(&self) -> SessionResult<()> {
        let ctx = self.context();
        let any_ran = self.run_actions(&ctx)?;

        // 保持外部截图画面更新
        if !any_ran {
            if let Err(e) = self.session.capture_screen() {
                if e.is_stop_signal() {
                    return Err(e);
                }
                debug!(device = %self.session.identity(), "idle capture failed: {}", e);
            }
        }

        self.run_triggered_commands(&ctx)?;

        if self.controls.skip_requested() {
            self.running("Skip requested - skipping Fix".to_string());
        } else if self.controls.fix_enabled() {
            self.run_fix(&ctx)?;
        }

        let sleep_seconds = self.controls.sleep_seconds();
        if sleep_seconds > 0.0 {
            self.running(format!("Sleeping {}s", sleep_seconds));
            self.session
                .cancellation()
                .sleep_with(Duration::from_secs_f64(sleep_seconds), || {
                    ctx.check_should_stop()
                })?;
        }
        self.controls.clear_skip();
        Ok(())
    }

    fn run_actions(&self, ctx: &BotContext<'_>) -> SessionResult<bool> {
        let mut any_ran = false;
        for (id, handler) in &self.actions {
            if self.controls.skip_requested() {
                if self.controls.is_enabled(id) {
                    self.running(format!("Skip requested - skipping {}", id));
                }
                break;
            }
            if !self.controls.is_enabled(id) || !self.controls.cooldown_ready(id) {
                continue;
            }

            self.running(id.clone());
            ctx.check_should_stop()?;
            match handler(ctx) {
                Ok(outcome) => {
                    any_ran = true;
                    if outcome != ActionOutcome::NotRun {
                        self.controls.mark_ran(id);
                    }
                    if outcome == ActionOutcome::Completed {
                        self.controls.set_enabled(id, false);
                        self.session.log(&format!("{} completed - unchecked", id));
                    }
                }
                Err(e) if e.is_stop_signal() => {
                    self.session.log(&format!("Stopped during {}", id));
                    return Err(e);
                }
                Err(e) => {
                    self.session.log(&format!("ERROR in {}: {}", id, e));
                    self.running(format!("Error in {}", id));
                    self.pause_after_error()?;
                }
            }
        }
        Ok(any_ran)
    }

    fn run_triggered_commands(&self, ctx: &BotContext<'_>) -> SessionResult<()> {
        for (id, handler) in &self.commands {
            if !self.controls.take_trigger(id) {
                continue;
            }
            self.running(format!("{} (command)", id));
            match handler(ctx) {
                Ok(()) => {}
                Err(e) if e.is_stop_signal() => {
                    self.session.log(&format!("Stopped during {} command", id));
                    return Err(e);
                }
                Err(e) => self.session.log(&format!("ERROR in {} command: {}", id, e)),
            }
        }
        Ok(())
    }

    fn run_fix(&self, ctx: &BotContext<'_>) -> SessionResult<()> {
        let Some(fix) = &self.fix else {
            return Ok(());
        };
        self.running("Fix/Recover".to_string());
        match fix(ctx) {
            Ok(()) => Ok(()),
            Err(e) if e.is_stop_signal() => {
                self.session.log("Stopped during Fix/Recover");
                Err(e)
            }
            Err(e) => {
                self.session.log(&format!("ERROR in Fix/Recover: {}", e));
                Ok(())
            }
        }
    }
}

impl fmt::Debug for AutomationLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomationLoop")
            .field("session", &self.session)
            .field("plan", &self.plan)
            .field("status", &self.controls.status())
            .finish()
    }
}
