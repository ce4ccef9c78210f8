use super::*;
use crate::{bbox::TLBR, common::*};

/// An image of the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Image {
    pub id: ImageId,
    pub filename: String,
    /// The image size in `(height, width)` pixels.
    pub size: (usize, usize),
}

impl From<&ImageEntry> for Image {
    fn from(from: &ImageEntry) -> Self {
        let ImageEntry {
            id,
            ref file_name,
            height,
            width,
        } = *from;

        Self {
            id,
            filename: file_name.clone(),
            size: (height, width),
        }
    }
}

/// An object annotation with a dense class index.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// The box in `[x, y, width, height]` pixel format.
    pub bbox: [f64; 4],
    /// The index into the sorted category id list.
    pub category_id: usize,
}

impl Annotation {
    /// Convert the store entry, remapping its category id to the position
    /// in the sorted `category_ids`.
    pub fn new(entry: &AnnotationEntry, category_ids: &[CategoryId]) -> Result<Self> {
        let category_id = category_ids
            .binary_search(&entry.category_id)
            .map_err(|_| {
                format_err!(
                    "annotation {} has unknown category id {}",
                    entry.id,
                    entry.category_id
                )
            })?;

        Ok(Self {
            bbox: entry.bbox,
            category_id,
        })
    }

    /// The box in TLBR format, or `None` if the box is empty or not finite.
    pub fn rect(&self) -> Option<TLBR<f64>> {
        let [x, y, w, h] = self.bbox;
        let valid = self.bbox.iter().all(|value| value.is_finite()) && w > 0.0 && h > 0.0;
        if !valid {
            return None;
        }
        TLBR::try_from_xywh([x, y, w, h]).ok()
    }
}

/// The typed view on an annotation store.
///
/// The sorted category id list is captured once at construction and used for
/// every later category remapping.
#[derive(Debug, Clone)]
pub struct Coco<S>
where
    S: AnnotationStore,
{
    store: S,
    category_ids: Vec<CategoryId>,
}

impl<S> Coco<S>
where
    S: AnnotationStore,
{
    pub fn new(store: S) -> Result<Self> {
        let category_ids: Vec<_> = store.category_ids().into_iter().sorted().collect();
        ensure!(!category_ids.is_empty(), "no categories found in the store");
        ensure!(
            category_ids.iter().tuple_windows().all(|(lhs, rhs)| lhs < rhs),
            "duplicated category ids found in the store"
        );

        Ok(Self {
            store,
            category_ids,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The sorted category ids.
    pub fn category_ids(&self) -> &[CategoryId] {
        &self.category_ids
    }

    pub fn num_classes(&self) -> usize {
        self.category_ids.len()
    }

    pub fn get_img_ids(&self) -> Vec<ImageId> {
        self.store.image_ids()
    }

    pub fn load_imgs(&self, ids: &[ImageId]) -> Result<Vec<Image>> {
        let images = self
            .store
            .load_images(ids)?
            .iter()
            .map(Image::from)
            .collect();
        Ok(images)
    }

    pub fn get_ann_ids(&self, img_ids: &[ImageId]) -> Vec<AnnotationId> {
        self.store.annotation_ids(img_ids)
    }

    pub fn load_anns(&self, ids: &[AnnotationId]) -> Result<Vec<Annotation>> {
        self.store
            .load_annotations(ids)?
            .iter()
            .map(|entry| Annotation::new(entry, &self.category_ids))
            .try_collect()
    }
}
