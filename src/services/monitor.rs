// Monitor 后端服务
// 延迟探测（TCP 连接计时）与系统信息探测（固定的一组只读命令）

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::constants::{COMMAND_TIMEOUT, LATENCY_TIMEOUT};
use crate::models::monitor::SystemInfo;
use crate::ssh::event::{EventSink, SessionEvent};
use crate::ssh::session::CommandOutput;
use crate::ssh::Connection;

// ============================================================================
// 命令执行抽象
// ============================================================================

/// 可以一次性执行命令的对象
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, limit: Duration) -> CommandOutput;
}

#[async_trait]
impl CommandRunner for Connection {
    async fn run(&self, command: &str, limit: Duration) -> CommandOutput {
        self.execute_command(command, limit).await
    }
}

// ============================================================================
// 延迟探测
// ============================================================================

/// 一次延迟探测的结果；`latency_ms` 为 -1 表示超时或失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyReport {
    pub server_id: String,
    pub latency_ms: i64,
}

/// TCP 延迟探测，不依赖 SSH 会话
#[derive(Debug, Clone)]
pub struct LatencyProbe {
    server_id: String,
    host: String,
    port: u16,
    timeout: Duration,
}

impl LatencyProbe {
    pub fn new(server_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            server_id: server_id.into(),
            host: host.into(),
            port,
            timeout: LATENCY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 测量建立 TCP 连接所需毫秒数，超时或失败返回 -1
    pub async fn measure(&self) -> i64 {
        let started = Instant::now();
        let addr = (self.host.as_str(), self.port);

        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {
                let ms = started.elapsed().as_millis() as i64;
                debug!("[Monitor] {}:{} latency {} ms", self.host, self.port, ms);
                ms
            }
            Ok(Err(e)) => {
                debug!("[Monitor] {}:{} unreachable: {}", self.host, self.port, e);
                -1
            }
            Err(_) => {
                debug!("[Monitor] {}:{} probe timed out", self.host, self.port);
                -1
            }
        }
    }

    /// 在给定运行时上探测，结果发送到通道
    pub fn spawn(
        self,
        runtime: &Handle,
        reports: mpsc::UnboundedSender<LatencyReport>,
    ) -> JoinHandle<()> {
        runtime.spawn(async move {
            let latency_ms = self.measure().await;
            let _ = reports.send(LatencyReport {
                server_id: self.server_id,
                latency_ms,
            });
        })
    }
}

// ============================================================================
// 系统信息探测
// ============================================================================

const CPU_COMMAND: &str = "cat /proc/cpuinfo | grep 'model name' | head -1 | cut -d ':' -f 2";
const MEMORY_COMMAND: &str = "free -h | grep Mem | awk '{print $2, $3, $3/$2*100}'";
const DISK_COMMAND: &str = "df -h / | tail -1 | awk '{print $2, $3, $5}'";
const OS_COMMAND: &str =
    "cat /etc/os-release 2>/dev/null | grep PRETTY_NAME | cut -d '=' -f 2 | tr -d '\"' || uname -s";
const UPTIME_COMMAND: &str = "uptime -p 2>/dev/null || uptime";

/// 系统信息探测
///
/// 依次执行五条只读命令；单条失败只保留默认值，不影响其余项。
pub struct SystemInfoProbe<R: CommandRunner + ?Sized> {
    runner: Arc<R>,
    timeout: Duration,
}

impl<R: CommandRunner + ?Sized + 'static> SystemInfoProbe<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self {
            runner,
            timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn output(&self, command: &str) -> String {
        let output = self.runner.run(command, self.timeout).await;
        if !output.is_success() {
            debug!("[Monitor] '{}' did not succeed: {}", command, output.stderr.trim());
        }
        trace!("[Monitor] '{}' -> {:?}", command, output.stdout);
        output.stdout
    }

    /// 收集系统信息
    pub async fn collect(&self) -> SystemInfo {
        let mut info = SystemInfo::default();

        apply_cpu(&mut info, &self.output(CPU_COMMAND).await);
        apply_memory(&mut info, &self.output(MEMORY_COMMAND).await);
        apply_disk(&mut info, &self.output(DISK_COMMAND).await);
        apply_os(&mut info, &self.output(OS_COMMAND).await);
        apply_uptime(&mut info, &self.output(UPTIME_COMMAND).await);

        info
    }

    /// 在给定运行时上探测，完成后发出 `SystemInfoReady`
    pub fn spawn(self, runtime: &Handle, events: EventSink) -> JoinHandle<()> {
        runtime.spawn(async move {
            let info = self.collect().await;
            info!(
                "[Monitor] System info ready for {}: {}",
                events.session_id(),
                info.os
            );
            events.emit(SessionEvent::SystemInfoReady(info));
        })
    }
}

fn apply_cpu(info: &mut SystemInfo, output: &str) {
    let cpu = output.trim();
    if !cpu.is_empty() {
        info.cpu = cpu.to_string();
    }
}

/// `total used percent`，百分比保留一位小数
fn apply_memory(info: &mut SystemInfo, output: &str) {
    let parts: Vec<&str> = output.split_whitespace().collect();
    if parts.len() >= 2 {
        info.memory_total = parts[0].to_string();
        info.memory_used = parts[1].to_string();
    }
    if let Some(percent) = parts.get(2).and_then(|p| p.parse::<f64>().ok()) {
        info.memory_percent = format!("{:.1}%", percent);
    }
}

/// `total used percent`
fn apply_disk(info: &mut SystemInfo, output: &str) {
    let parts: Vec<&str> = output.split_whitespace().collect();
    if parts.len() >= 2 {
        info.disk_total = parts[0].to_string();
        info.disk_used = parts[1].to_string();
    }
    if let Some(percent) = parts.get(2) {
        info.disk_percent = percent.to_string();
    }
}

fn apply_os(info: &mut SystemInfo, output: &str) {
    let os = output.trim();
    if !os.is_empty() {
        info.os = os.to_string();
    }
}

fn apply_uptime(info: &mut SystemInfo, output: &str) {
    let uptime = output.trim();
    if !uptime.is_empty() {
        info.uptime = uptime.strip_prefix("up ").unwrap_or(uptime).to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::monitor::UNKNOWN;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    /// 按命令返回预设输出的假执行器
    struct FakeRunner {
        outputs: HashMap<&'static str, &'static str>,
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, command: &str, _limit: Duration) -> CommandOutput {
            match self.outputs.get(command) {
                Some(out) => CommandOutput {
                    stdout: out.to_string(),
                    stderr: String::new(),
                    exit_code: Some(0),
                },
                None => CommandOutput::failure("command not found"),
            }
        }
    }

    #[tokio::test]
    async fn test_collect_parses_all_fields() {
        let runner = FakeRunner {
            outputs: HashMap::from([
                (CPU_COMMAND, " Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz\n"),
                (MEMORY_COMMAND, "7.6Gi 3.1Gi 40.7895\n"),
                (DISK_COMMAND, "40G 15G 37%\n"),
                (OS_COMMAND, "Ubuntu 22.04.3 LTS\n"),
                (UPTIME_COMMAND, "up 3 days, 4 hours\n"),
            ]),
        };
        let info = SystemInfoProbe::new(Arc::new(runner)).collect().await;

        assert_eq!(
            info,
            SystemInfo {
                cpu: "Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz".into(),
                memory_total: "7.6Gi".into(),
                memory_used: "3.1Gi".into(),
                memory_percent: "40.8%".into(),
                disk_total: "40G".into(),
                disk_used: "15G".into(),
                disk_percent: "37%".into(),
                os: "Ubuntu 22.04.3 LTS".into(),
                uptime: "3 days, 4 hours".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_commands_default_to_unknown() {
        let runner = FakeRunner {
            outputs: HashMap::from([
                (MEMORY_COMMAND, "7.6Gi 3.1Gi nan-ish\n"),
                (UPTIME_COMMAND, " 10:01:02 up 5 min,  1 user\n"),
            ]),
        };
        let info = SystemInfoProbe::new(Arc::new(runner)).collect().await;

        assert_eq!(info.cpu, UNKNOWN);
        assert_eq!(info.memory_total, "7.6Gi");
        assert_eq!(info.memory_percent, UNKNOWN);
        assert_eq!(info.disk_total, UNKNOWN);
        assert_eq!(info.os, UNKNOWN);
        assert_eq!(info.uptime, "10:01:02 up 5 min,  1 user");
    }

    #[test]
    fn test_disk_with_two_fields() {
        let mut info = SystemInfo::default();
        apply_disk(&mut info, "40G 15G");
        assert_eq!(info.disk_total, "40G");
        assert_eq!(info.disk_percent, UNKNOWN);
    }

    #[tokio::test]
    async fn test_latency_to_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let latency = LatencyProbe::new("s1", "127.0.0.1", port).measure().await;
        assert!(latency >= 0);
        assert!(latency < 3000);
    }

    #[tokio::test]
    async fn test_latency_closed_port_is_negative() {
        // 绑定后立即释放，得到一个没有监听的端口
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let started = Instant::now();
        let latency = LatencyProbe::new("s1", "127.0.0.1", port).measure().await;
        assert_eq!(latency, -1);
        assert!(started.elapsed() <= LATENCY_TIMEOUT + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_latency_report_via_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        LatencyProbe::new("s9", "127.0.0.1", 1)
            .with_timeout(Duration::from_millis(500))
            .spawn(&Handle::current(), tx)
            .await
            .unwrap();
        let report = rx.recv().await.unwrap();
        assert_eq!(report.server_id, "s9");
        assert_eq!(report.latency_ms, -1);
    }
}
