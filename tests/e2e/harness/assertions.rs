use anyhow::Result;
use fsguard_core::{CorruptionKind, Guard, InterruptedStatus, RecoveryStrategy};

/// Declarative assertions on guarded state
pub enum Assertion {
    // Files
    FileContent { path: String, content: Vec<u8> },
    FileMissing { path: String },
    NoPartialFiles,

    // Atomic operations
    LastOperationSucceeded,
    LastOperationFailed,

    // Integrity
    IntegrityClean,
    Corruption { path: String, kind: CorruptionKind },
    RecordCount(usize),

    // Recovery
    InterruptedCount(usize),
    PlannedStrategy {
        target: String,
        strategy: RecoveryStrategy,
        status: InterruptedStatus,
    },
    RecoveredCount(usize),

    // Custom
    Custom(Box<dyn Fn(&Guard) -> Result<()> + Send + Sync>),
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileContent { path, content } => write!(
                f,
                "FileContent {{ path: {:?}, content: {:?} }}",
                path,
                String::from_utf8_lossy(content)
            ),
            Self::FileMissing { path } => write!(f, "FileMissing {{ path: {:?} }}", path),
            Self::NoPartialFiles => write!(f, "NoPartialFiles"),
            Self::LastOperationSucceeded => write!(f, "LastOperationSucceeded"),
            Self::LastOperationFailed => write!(f, "LastOperationFailed"),
            Self::IntegrityClean => write!(f, "IntegrityClean"),
            Self::Corruption { path, kind } => {
                write!(f, "Corruption {{ path: {:?}, kind: {} }}", path, kind)
            }
            Self::RecordCount(n) => write!(f, "RecordCount({})", n),
            Self::InterruptedCount(n) => write!(f, "InterruptedCount({})", n),
            Self::PlannedStrategy {
                target,
                strategy,
                status,
            } => write!(
                f,
                "PlannedStrategy {{ target: {:?}, strategy: {}, status: {} }}",
                target, strategy, status
            ),
            Self::RecoveredCount(n) => write!(f, "RecoveredCount({})", n),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}
