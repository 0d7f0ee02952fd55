use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::time::Duration;

/// Справочник известных визуальных эффектов и их номинальной длительности.
///
/// Используется для выбора дедлайна watchdog по умолчанию: самый медленный
/// эффект плюс запас.
pub struct EffectCatalog;

// Статическая карта длительностей эффектов (мс)
static EFFECT_DURATIONS_MS: Lazy<HashMap<&'static str, u64>> = Lazy::new(|| {
    let mut map = HashMap::new();

    // Простые смешивания
    map.insert("cut", 0);
    map.insert("crossfade", 1_200);
    map.insert("fade_through_black", 1_800);

    // Геометрические
    map.insert("slide", 1_500);
    map.insert("push", 1_500);
    map.insert("zoom", 2_000);
    map.insert("ken_burns", 6_000);

    // Шейдерные
    map.insert("dissolve", 2_500);
    map.insert("ripple", 3_000);
    map.insert("page_curl", 4_000);
    map.insert("mosaic", 3_500);

    map
});

impl EffectCatalog {
    /// Номинальная длительность эффекта, если он известен
    pub fn duration_of(name: &str) -> Option<Duration> {
        EFFECT_DURATIONS_MS
            .get(name.to_lowercase().as_str())
            .map(|ms| Duration::from_millis(*ms))
    }

    /// Длительность самого медленного известного эффекта
    pub fn slowest() -> Duration {
        let max_ms = EFFECT_DURATIONS_MS.values().copied().max().unwrap_or(0);
        Duration::from_millis(max_ms)
    }

    /// Дедлайн watchdog: самый медленный эффект плюс запас
    pub fn watchdog_deadline(margin: Duration) -> Duration {
        Self::slowest() + margin
    }

    pub fn names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = EFFECT_DURATIONS_MS.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
