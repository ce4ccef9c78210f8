use super::*;
use crate::common::*;

/// The content of a COCO instances annotation file.
///
/// Fields other than the listed ones are ignored. Image info files of test
/// splits have no annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instances {
    pub images: Vec<ImageEntry>,
    #[serde(default)]
    pub annotations: Vec<AnnotationEntry>,
    pub categories: Vec<CategoryEntry>,
}

/// The in-memory annotation store backed by a COCO instances file.
#[derive(Debug, Clone)]
pub struct CocoStore {
    categories: IndexMap<CategoryId, CategoryEntry>,
    images: IndexMap<ImageId, ImageEntry>,
    annotations: IndexMap<AnnotationId, AnnotationEntry>,
    image_to_annotations: HashMap<ImageId, Vec<AnnotationId>>,
}

impl CocoStore {
    /// Load the store from a COCO instances JSON file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read annotation file '{}'", path.display()))?;
        let instances: Instances = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse annotation file '{}'", path.display()))?;
        let store = Self::from_instances(instances)?;

        info!(
            "loaded '{}' with {} images, {} annotations and {} categories",
            path.display(),
            store.images.len(),
            store.annotations.len(),
            store.categories.len()
        );

        Ok(store)
    }

    /// Index the records of an annotation file.
    pub fn from_instances(instances: Instances) -> Result<Self> {
        let Instances {
            images,
            annotations,
            categories,
        } = instances;

        let num_categories = categories.len();
        let categories: IndexMap<_, _> = categories.into_iter().map(|cat| (cat.id, cat)).collect();
        ensure!(
            categories.len() == num_categories,
            "duplicated category ids found"
        );

        let num_images = images.len();
        let images: IndexMap<_, _> = images.into_iter().map(|img| (img.id, img)).collect();
        ensure!(images.len() == num_images, "duplicated image ids found");

        let num_annotations = annotations.len();
        let annotations: IndexMap<_, _> =
            annotations.into_iter().map(|ann| (ann.id, ann)).collect();
        ensure!(
            annotations.len() == num_annotations,
            "duplicated annotation ids found"
        );

        annotations.values().try_for_each(|ann| {
            ensure!(
                images.contains_key(&ann.image_id),
                "annotation {} refers to missing image {}",
                ann.id,
                ann.image_id
            );
            ensure!(
                categories.contains_key(&ann.category_id),
                "annotation {} refers to missing category {}",
                ann.id,
                ann.category_id
            );
            Ok(())
        })?;

        let image_to_annotations = annotations
            .values()
            .map(|ann| (ann.image_id, ann.id))
            .into_group_map();

        Ok(Self {
            categories,
            images,
            annotations,
            image_to_annotations,
        })
    }

    pub fn categories(&self) -> impl Iterator<Item = &CategoryEntry> {
        self.categories.values()
    }
}

impl AnnotationStore for CocoStore {
    fn category_ids(&self) -> Vec<CategoryId> {
        self.categories.keys().cloned().collect()
    }

    fn image_ids(&self) -> Vec<ImageId> {
        self.images.keys().cloned().collect()
    }

    fn load_images(&self, ids: &[ImageId]) -> Result<Vec<ImageEntry>> {
        ids.iter()
            .map(|id| {
                self.images
                    .get(id)
                    .cloned()
                    .ok_or_else(|| format_err!("image id {} does not exist", id))
            })
            .try_collect()
    }

    fn annotation_ids(&self, image_ids: &[ImageId]) -> Vec<AnnotationId> {
        image_ids
            .iter()
            .filter_map(|image_id| self.image_to_annotations.get(image_id))
            .flatten()
            .cloned()
            .collect()
    }

    fn load_annotations(&self, ids: &[AnnotationId]) -> Result<Vec<AnnotationEntry>> {
        ids.iter()
            .map(|id| {
                self.annotations
                    .get(id)
                    .cloned()
                    .ok_or_else(|| format_err!("annotation id {} does not exist", id))
            })
            .try_collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANNOTATION_FILE: &str = r#"{
        "info": { "description": "tiny" },
        "images": [
            { "id": 9, "file_name": "9.png", "height": 64, "width": 48, "license": 1 },
            { "id": 2, "file_name": "2.png", "height": 32, "width": 32 }
        ],
        "annotations": [
            { "id": 100, "image_id": 9, "category_id": 50, "bbox": [1.0, 2.0, 3.0, 4.0], "iscrowd": 0 },
            { "id": 101, "image_id": 2, "category_id": 3, "bbox": [0.0, 0.0, 8.0, 8.0] },
            { "id": 102, "image_id": 9, "category_id": 17, "bbox": [4.0, 4.0, 8.0, 8.0] }
        ],
        "categories": [
            { "id": 17, "name": "dog", "supercategory": "animal" },
            { "id": 3, "name": "car" },
            { "id": 50, "name": "spoon" }
        ]
    }"#;

    #[test]
    fn parse_and_query() -> Result<()> {
        let instances: Instances = serde_json::from_str(ANNOTATION_FILE)?;
        let store = CocoStore::from_instances(instances)?;

        assert_eq!(store.category_ids(), vec![17, 3, 50]);
        assert_eq!(store.image_ids(), vec![9, 2]);
        assert_eq!(store.annotation_ids(&[9]), vec![100, 102]);
        assert_eq!(store.annotation_ids(&[2, 9]), vec![101, 100, 102]);

        let images = store.load_images(&[2])?;
        assert_eq!(images[0].file_name, "2.png");
        assert_eq!((images[0].height, images[0].width), (32, 32));

        let anns = store.load_annotations(&[102])?;
        assert_eq!(anns[0].category_id, 17);
        assert_eq!(anns[0].bbox, [4.0, 4.0, 8.0, 8.0]);

        let names: Vec<_> = store.categories().map(|cat| cat.name.as_str()).collect();
        assert_eq!(names, vec!["dog", "car", "spoon"]);

        assert!(store.load_images(&[1]).is_err());
        assert!(store.load_annotations(&[1]).is_err());
        Ok(())
    }

    #[test]
    fn reject_dangling_annotation() -> Result<()> {
        let mut instances: Instances = serde_json::from_str(ANNOTATION_FILE)?;
        instances.annotations[0].image_id = 77;
        assert!(CocoStore::from_instances(instances).is_err());
        Ok(())
    }

    #[test]
    fn image_info_without_annotations() -> Result<()> {
        let text = r#"{
            "images": [
                { "id": 5, "file_name": "5.png", "height": 32, "width": 64 }
            ],
            "categories": [
                { "id": 1, "name": "person" }
            ]
        }"#;
        let instances: Instances = serde_json::from_str(text)?;
        assert!(instances.annotations.is_empty());

        let store = CocoStore::from_instances(instances)?;
        assert_eq!(store.image_ids(), vec![5]);
        assert!(store.annotation_ids(&[5]).is_empty());
        Ok(())
    }
}
