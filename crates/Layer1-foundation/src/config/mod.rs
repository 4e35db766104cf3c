//! Vigia Config - 통합 설정
//!
//! JSON 파일(글로벌) 위에 환경변수를 덮어쓰는 2단계 로드.

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// 설정 파일명
pub const VIGIA_CONFIG_FILE: &str = "config.json";

// ============================================================================
// Vigia Config (통합)
// ============================================================================

/// Vigia 통합 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigiaConfig {
    /// 카탈로그 API base URL
    pub catalog_base_url: String,

    /// SQLite 데이터 디렉토리
    pub data_dir: Option<PathBuf>,

    /// 알림 채널 설정
    pub channel: ChannelConfig,

    /// 변경 감지 사이클 설정
    pub alerts: AlertsConfig,

    /// 일일 신규 데이터셋 요약 설정
    pub summary: SummaryConfig,

    /// 키워드 매칭용 동의어 테이블 (canonical → synonyms)
    ///
    /// 배포별로 교체 가능한 설정이며 기본값은 운영에서 수집한 테이블.
    pub synonyms: HashMap<String, Vec<String>>,
}

impl Default for VigiaConfig {
    fn default() -> Self {
        Self {
            catalog_base_url: "https://analisis.datosabiertos.jcyl.es".to_string(),
            data_dir: None,
            channel: ChannelConfig::default(),
            alerts: AlertsConfig::default(),
            summary: SummaryConfig::default(),
            synonyms: default_synonyms(),
        }
    }
}

/// 알림 채널 (Telegram Bot API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    /// Bot token (env: TELEGRAM_BOT_TOKEN)
    pub bot_token: Option<String>,
    pub api_base_url: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base_url: "https://api.telegram.org".to_string(),
        }
    }
}

/// 변경 감지 사이클 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertsConfig {
    pub enabled: bool,

    /// 사이클 주기 (시간 단위)
    pub check_interval_hours: u64,

    /// scope(테마) 당 한 번에 가져올 데이터셋 수
    pub datasets_per_scope_page_size: u32,

    /// 사이클 내 읽기 병렬도
    pub worker_pool_size: usize,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_hours: 2,
            datasets_per_scope_page_size: 100,
            worker_pool_size: 4,
        }
    }
}

/// 일일 요약 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryConfig {
    pub enabled: bool,

    /// 요약 실행 시각 (현지 시간, 0-23)
    pub hour: u32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 9,
        }
    }
}

impl VigiaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 설정 파일 로드 + 환경변수 적용
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(file_config) = global.load_optional::<VigiaConfig>(VIGIA_CONFIG_FILE)? {
                config = file_config;
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// 명시적 경로에서 로드 + 환경변수 적용
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let store = JsonStore::new(path.parent().unwrap_or(std::path::Path::new(".")));
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(VIGIA_CONFIG_FILE);

        let mut config: VigiaConfig = store.load(filename)?;
        config.apply_env();
        Ok(config)
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        let store = JsonStore::global()?;
        store.save(VIGIA_CONFIG_FILE, self)
    }

    /// 환경변수 덮어쓰기
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                self.channel.bot_token = Some(token);
            }
        }
        if let Ok(url) = std::env::var("VIGIA_CATALOG_BASE_URL") {
            if !url.is_empty() {
                self.catalog_base_url = url;
            }
        }
        if let Ok(dir) = std::env::var("VIGIA_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(enabled) = std::env::var("VIGIA_ALERTS_ENABLED") {
            if let Ok(value) = enabled.parse() {
                self.alerts.enabled = value;
            }
        }
        if let Ok(hours) = std::env::var("VIGIA_CHECK_INTERVAL_HOURS") {
            if let Ok(value) = hours.parse() {
                self.alerts.check_interval_hours = value;
            }
        }
    }

    /// 데이터 디렉토리 (기본: ~/.local/share 계열 아래 vigia/)
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.data_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vigia")
    }
}

/// 운영에서 수집한 기본 동의어 테이블
///
/// canonical 키워드 → 같은 관심사로 취급할 용어들.
fn default_synonyms() -> HashMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 9] = [
        ("salud", &["sanidad", "sanitario", "hospital", "medico", "medicina", "clinica"]),
        ("educacion", &["educativo", "escolar", "colegio", "escuela", "universidad", "instituto"]),
        ("empleo", &["trabajo", "laboral", "ocupacion", "profesional"]),
        ("transporte", &["movilidad", "vehiculo", "autobus", "tren", "carretera"]),
        ("economia", &["economico", "financiero", "presupuesto", "gasto", "inversion"]),
        ("turismo", &["turistico", "hotel", "alojamiento", "visitante"]),
        ("medio ambiente", &["medioambiente", "ambiental", "ecologia", "sostenible"]),
        ("energia", &["electrico", "renovable", "consumo"]),
        ("sector publico", &["gobierno", "administracion"]),
    ];

    table
        .iter()
        .map(|(canonical, synonyms)| {
            (
                canonical.to_string(),
                synonyms.iter().map(|s| s.to_string()).collect(),
            )
        })
        .collect()
}
