use crate::common::*;

pub type ImageId = u64;
pub type AnnotationId = u64;
pub type CategoryId = u64;

/// An image entry as recorded by the annotation store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageEntry {
    pub id: ImageId,
    pub file_name: String,
    pub height: usize,
    pub width: usize,
}

/// An object annotation as recorded by the annotation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationEntry {
    pub id: AnnotationId,
    pub image_id: ImageId,
    pub category_id: CategoryId,
    /// The box in `[x, y, width, height]` pixel format.
    pub bbox: [f64; 4],
}

/// A category entry as recorded by the annotation store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub supercategory: String,
}

/// The query interface of an annotation store.
///
/// The image and annotation orders are defined by the store and must be
/// stable as long as the store is not modified.
pub trait AnnotationStore
where
    Self: Debug,
{
    /// List all category ids.
    fn category_ids(&self) -> Vec<CategoryId>;

    /// List all image ids.
    fn image_ids(&self) -> Vec<ImageId>;

    /// Look up image entries by ids.
    fn load_images(&self, ids: &[ImageId]) -> Result<Vec<ImageEntry>>;

    /// List the ids of annotations that belong to any of the images.
    fn annotation_ids(&self, image_ids: &[ImageId]) -> Vec<AnnotationId>;

    /// Look up annotations by ids.
    fn load_annotations(&self, ids: &[AnnotationId]) -> Result<Vec<AnnotationEntry>>;
}
