use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

/// Идентификатор экземпляра окна, уникальный в пределах процесса
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u64);

impl WindowId {
    /// Выдать новый идентификатор
    pub fn next() -> Self {
        Self(NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "win#{}", self.0)
    }
}

/// Геометрия дисплея в глобальных координатах
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl WindowGeometry {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Нулевая площадь означает отключённый или ещё не настроенный дисплей
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        (x as i64) >= self.x as i64 && (x as i64) < right && (y as i64) >= self.y as i64 && (y as i64) < bottom
    }

    /// Перевести глобальную точку в локальные координаты дисплея
    pub fn to_local(&self, x: i32, y: i32) -> LocalPoint {
        LocalPoint { x: x - self.x, y: y - self.y }
    }
}

impl fmt::Display for WindowGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Точка в локальных координатах окна
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalPoint {
    pub x: i32,
    pub y: i32,
}

/// Стабильная подпись физического дисплея.
///
/// Не меняется при пересоздании нативного окна: строится из серийного номера,
/// модели и геометрии, а при их отсутствии из идентичности объекта.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DisplaySignature(String);

impl DisplaySignature {
    pub fn derive(descriptor: &DisplayDescriptor) -> Self {
        let serial = descriptor.serial.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let model = descriptor.model.as_deref().map(str::trim).filter(|s| !s.is_empty());

        match (serial, model) {
            (Some(serial), Some(model)) => Self(format!("{}:{}", model, serial)),
            (Some(serial), None) => Self(format!("serial:{}", serial)),
            (None, model) if descriptor.geometry.is_valid() => Self(format!(
                "{}@{}",
                model.unwrap_or("display"),
                descriptor.geometry
            )),
            _ => Self(format!("object:{:#x}", descriptor.object_token)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DisplaySignature {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DisplaySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Сырые сведения о дисплее, из которых выводится подпись
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayDescriptor {
    pub serial: Option<String>,
    pub model: Option<String>,
    pub geometry: WindowGeometry,
    /// Идентичность нативного объекта экрана (последний резерв)
    pub object_token: usize,
}

impl DisplayDescriptor {
    pub fn new(geometry: WindowGeometry, object_token: usize) -> Self {
        Self {
            serial: None,
            model: None,
            geometry,
            object_token,
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Привязка окна к дисплею
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub signature: DisplaySignature,
    pub geometry: WindowGeometry,
}

impl DisplayInfo {
    pub fn new(signature: DisplaySignature, geometry: WindowGeometry) -> Self {
        Self { signature, geometry }
    }
}

impl fmt::Display for DisplayInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.signature, self.geometry)
    }
}
