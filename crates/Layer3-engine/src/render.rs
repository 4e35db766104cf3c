//! Notification message rendering
//!
//! 구독자에게 보낼 메시지 본문을 만든다. 채널은 Markdown을 받는다.
//! 메시지 스타일은 매칭 규칙의 구체성을 따른다: 데이터셋/키워드 구독은
//! 상세 메시지, 테마 구독은 테마 문맥이 앞에 오는 요약 메시지.

use crate::types::{ChangeEvent, ChangeKind};
use vigia_catalog::{format_friendly_date, truncate_title};
use vigia_foundation::{KnownDatasetRecord, SubscriptionKind, UNAVAILABLE};

const TITLE_MAX_CHARS: usize = 80;

pub struct Renderer {
    catalog_base_url: String,
}

impl Renderer {
    pub fn new(catalog_base_url: impl Into<String>) -> Self {
        Self {
            catalog_base_url: catalog_base_url.into(),
        }
    }

    fn dataset_url(&self, dataset_id: &str) -> String {
        format!(
            "{}/explore/dataset/{}/",
            self.catalog_base_url.trim_end_matches('/'),
            dataset_id
        )
    }

    /// Render one event for one recipient
    pub fn render_event(&self, event: &ChangeEvent, specificity: SubscriptionKind) -> String {
        match specificity {
            SubscriptionKind::Theme => self.render_theme_style(event),
            SubscriptionKind::Dataset | SubscriptionKind::Keyword => {
                self.render_dataset_style(event)
            }
        }
    }

    fn header(event: &ChangeEvent) -> &'static str {
        match event.kind {
            ChangeKind::New => "🆕 *Nuevo conjunto de datos*",
            ChangeKind::Updated => "🔄 *Conjunto de datos actualizado*",
        }
    }

    fn render_dataset_style(&self, event: &ChangeEvent) -> String {
        let entity = &event.entity;
        let title = truncate_title(&entity.title, TITLE_MAX_CHARS);
        let mut lines = vec![
            Self::header(event).to_string(),
            String::new(),
            format!("📊 *{}*", title),
        ];

        if let Some(publisher) = &entity.publisher {
            if publisher != UNAVAILABLE {
                lines.push(format!("🏛 {}", publisher));
            }
        }
        if let Some(modified) = &entity.modified {
            lines.push(format!(
                "📅 Última modificación: {}",
                format_friendly_date(modified)
            ));
        }
        if entity.records_count > 0 {
            lines.push(format!("📈 Registros: {}", entity.records_count));
        }

        lines.push(String::new());
        lines.push(format!("🔗 {}", self.dataset_url(&entity.id)));
        lines.join("\n")
    }

    fn render_theme_style(&self, event: &ChangeEvent) -> String {
        let entity = &event.entity;
        let theme = event
            .theme_scope
            .clone()
            .or_else(|| entity.themes.first().cloned())
            .unwrap_or_else(|| "tu categoría".to_string());
        let title = truncate_title(&entity.title, TITLE_MAX_CHARS);

        let action = match event.kind {
            ChangeKind::New => "Nuevo conjunto de datos",
            ChangeKind::Updated => "Conjunto de datos actualizado",
        };

        let mut lines = vec![
            format!("📂 Novedades en *{}*", theme),
            String::new(),
            format!("{}: *{}*", action, title),
        ];
        if let Some(modified) = &entity.modified {
            lines.push(format!("📅 {}", format_friendly_date(modified)));
        }
        lines.push(String::new());
        lines.push(format!("🔗 {}", self.dataset_url(&entity.id)));
        lines.join("\n")
    }

    /// Daily digest of datasets that appeared in the catalog
    pub fn render_daily_summary(&self, date: &str, new_datasets: &[KnownDatasetRecord]) -> String {
        let mut lines = vec![
            format!(
                "🗞 *Resumen diario* — {}",
                format_friendly_date(date)
            ),
            String::new(),
            format!(
                "Se han publicado {} conjuntos de datos nuevos:",
                new_datasets.len()
            ),
            String::new(),
        ];

        for dataset in new_datasets.iter().take(10) {
            let title = dataset
                .title
                .clone()
                .unwrap_or_else(|| dataset.dataset_id.clone());
            lines.push(format!(
                "• *{}*\n  🔗 {}",
                truncate_title(&title, TITLE_MAX_CHARS),
                self.dataset_url(&dataset.dataset_id)
            ));
        }
        if new_datasets.len() > 10 {
            lines.push(String::new());
            lines.push(format!("… y {} más.", new_datasets.len() - 10));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigia_foundation::{EntityKind, EntityState, Fingerprint};

    fn event(kind: ChangeKind, scope: Option<&str>) -> ChangeEvent {
        ChangeEvent {
            entity: EntityState {
                kind: EntityKind::Dataset,
                id: "calidad-del-aire".to_string(),
                title: "Calidad del aire".to_string(),
                description: None,
                publisher: Some("Junta de Castilla y León".to_string()),
                modified: Some("2025-08-12T11:14:26+00:00".to_string()),
                data_processed: None,
                metadata_processed: None,
                records_count: 15000,
                themes: vec!["Medio ambiente".to_string()],
                keywords: vec![],
            },
            kind,
            fingerprint_before: None,
            fingerprint_after: Fingerprint::new("f"),
            theme_scope: scope.map(str::to_string),
            detected_at: "now".to_string(),
        }
    }

    #[test]
    fn dataset_style_has_detail_and_link() {
        let renderer = Renderer::new("https://catalogo.example.es");
        let message = renderer.render_event(&event(ChangeKind::Updated, None), SubscriptionKind::Dataset);

        assert!(message.contains("Conjunto de datos actualizado"));
        assert!(message.contains("Calidad del aire"));
        assert!(message.contains("12 de agosto de 2025"));
        assert!(message.contains("Registros: 15000"));
        assert!(message.contains("https://catalogo.example.es/explore/dataset/calidad-del-aire/"));
    }

    #[test]
    fn theme_style_leads_with_the_scope() {
        let renderer = Renderer::new("https://catalogo.example.es");
        let message = renderer.render_event(
            &event(ChangeKind::New, Some("Medio ambiente")),
            SubscriptionKind::Theme,
        );

        assert!(message.starts_with("📂 Novedades en *Medio ambiente*"));
        assert!(message.contains("Nuevo conjunto de datos"));
    }

    #[test]
    fn keyword_style_reuses_dataset_detail() {
        let renderer = Renderer::new("https://catalogo.example.es");
        let dataset = renderer.render_event(&event(ChangeKind::Updated, None), SubscriptionKind::Dataset);
        let keyword = renderer.render_event(&event(ChangeKind::Updated, None), SubscriptionKind::Keyword);
        assert_eq!(dataset, keyword);
    }

    #[test]
    fn daily_summary_lists_and_truncates() {
        let renderer = Renderer::new("https://catalogo.example.es");
        let datasets: Vec<KnownDatasetRecord> = (0..12)
            .map(|i| KnownDatasetRecord {
                dataset_id: format!("ds-{}", i),
                title: Some(format!("Dataset {}", i)),
                publisher: None,
            })
            .collect();

        let message = renderer.render_daily_summary("2025-08-27", &datasets);
        assert!(message.contains("12 conjuntos de datos nuevos"));
        assert!(message.contains("Dataset 0"));
        assert!(message.contains("… y 2 más."));
    }
}
