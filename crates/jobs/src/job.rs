use imgrot_transform::Angle;

/// One unit of work: rotate `file_name` by `angle`.
///
/// `file_name` is relative to the input directory the producer enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub file_name: String,
    pub angle: Angle,
}

impl Job {
    pub fn new(file_name: impl Into<String>, angle: Angle) -> Self {
        Self {
            file_name: file_name.into(),
            angle,
        }
    }
}
