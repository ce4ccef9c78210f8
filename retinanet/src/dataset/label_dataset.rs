use super::*;
use crate::{
    common::*,
    config::DatasetConfig,
    label::{AssignmentPolicy, LabelEncoder, Labels},
    level::Level,
};

/// The number of images in the COCO 2017 training split.
pub const COCO_2017_TRAIN_NUM_IMAGES: usize = 118287;

/// The per-image targets without image pixels.
#[derive(Debug)]
pub struct LabelRecord {
    pub image_path: PathBuf,
    pub image: Image,
    pub labels: Labels,
}

impl LabelRecord {
    /// Decode the image file and attach it to the targets.
    pub fn load_image(self) -> Result<DataRecord> {
        let Self {
            image_path,
            image,
            labels,
        } = self;
        let image = load_image(&image_path, Some(image.size))?;
        Ok(DataRecord { image, labels })
    }
}

/// The dataset that produces per-level targets for every image of a store.
#[derive(Debug)]
pub struct LabelDataset<S>
where
    S: AnnotationStore,
{
    coco: Coco<S>,
    dataset_dir: PathBuf,
    levels: Vec<Level>,
    encoder: LabelEncoder,
    expected_num_images: Option<usize>,
}

impl LabelDataset<CocoStore> {
    /// Open the COCO annotation file named by the configuration.
    pub fn open(config: &DatasetConfig, levels: Vec<Level>) -> Result<Self> {
        let DatasetConfig {
            ref annotation_file,
            ref dataset_dir,
            expected_num_images,
            ref assignment,
        } = *config;

        let store = CocoStore::open(annotation_file)?;
        let coco = Coco::new(store)?;
        Self::new(
            coco,
            dataset_dir,
            levels,
            assignment.clone(),
            expected_num_images,
        )
    }
}

impl<S> LabelDataset<S>
where
    S: AnnotationStore,
{
    pub fn new(
        coco: Coco<S>,
        dataset_dir: impl AsRef<Path>,
        levels: Vec<Level>,
        policy: AssignmentPolicy,
        expected_num_images: Option<usize>,
    ) -> Result<Self> {
        ensure!(!levels.is_empty(), "at least one level is required");
        let encoder = LabelEncoder::new(coco.num_classes(), policy)?;

        Ok(Self {
            coco,
            dataset_dir: dataset_dir.as_ref().to_owned(),
            levels,
            encoder,
            expected_num_images,
        })
    }

    pub fn coco(&self) -> &Coco<S> {
        &self.coco
    }

    pub fn num_classes(&self) -> usize {
        self.coco.num_classes()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    /// Start a new pass over the dataset.
    ///
    /// Image entries are fetched up front while annotations and targets are
    /// computed one image at a time as the iterator advances. Every call
    /// walks the images in the order of the store.
    pub fn iter(&self) -> Result<LabelRecords<'_, S>> {
        let images = self.coco.load_imgs(&self.coco.get_img_ids())?;

        if let Some(expected) = self.expected_num_images {
            ensure!(
                images.len() == expected,
                "the dataset is expected to have {} images, but found {}",
                expected,
                images.len()
            );
        }

        Ok(LabelRecords {
            dataset: self,
            images: images.into_iter(),
        })
    }

    fn make_record(&self, image: Image) -> Result<LabelRecord> {
        let image_path = self.dataset_dir.join(&image.filename);
        let annotations = self.coco.load_anns(&self.coco.get_ann_ids(&[image.id]))?;
        let labels = self
            .encoder
            .make_labels(&image, &annotations, &self.levels)
            .with_context(|| format!("failed to encode labels of image {}", image.id))?;

        Ok(LabelRecord {
            image_path,
            image,
            labels,
        })
    }
}

/// The lazy iterator of label records.
#[derive(Debug)]
pub struct LabelRecords<'a, S>
where
    S: AnnotationStore,
{
    dataset: &'a LabelDataset<S>,
    images: std::vec::IntoIter<Image>,
}

impl<'a, S> LabelRecords<'a, S>
where
    S: AnnotationStore,
{
    /// Decode the image of each record as the iteration goes.
    pub fn with_images(self) -> impl Iterator<Item = Result<DataRecord>> + 'a {
        self.map(|record| record?.load_image())
    }
}

impl<'a, S> Iterator for LabelRecords<'a, S>
where
    S: AnnotationStore,
{
    type Item = Result<LabelRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let image = self.images.next()?;
        Some(self.dataset.make_record(image))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.images.size_hint()
    }
}

impl<'a, S> ExactSizeIterator for LabelRecords<'a, S> where S: AnnotationStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::make_levels;

    fn coco() -> Result<Coco<CocoStore>> {
        let instances = Instances {
            images: vec![
                ImageEntry {
                    id: 3,
                    file_name: "3.png".into(),
                    height: 256,
                    width: 128,
                },
                ImageEntry {
                    id: 1,
                    file_name: "1.png".into(),
                    height: 128,
                    width: 128,
                },
            ],
            annotations: vec![AnnotationEntry {
                id: 7,
                image_id: 3,
                category_id: 2,
                bbox: [10.0, 20.0, 30.0, 40.0],
            }],
            categories: vec![
                CategoryEntry {
                    id: 2,
                    name: "a".into(),
                    supercategory: String::new(),
                },
                CategoryEntry {
                    id: 1,
                    name: "b".into(),
                    supercategory: String::new(),
                },
            ],
        };
        Coco::new(CocoStore::from_instances(instances)?)
    }

    #[test]
    fn records_follow_store_order() -> Result<()> {
        let dataset = LabelDataset::new(
            coco()?,
            "/data/coco",
            make_levels(),
            AssignmentPolicy::Placeholder,
            Some(2),
        )?;

        assert_eq!(dataset.dataset_dir(), Path::new("/data/coco"));

        let records: Vec<_> = dataset.iter()?.try_collect()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].image_path, Path::new("/data/coco/3.png"));
        assert_eq!(records[1].image.id, 1);

        let labels = &records[0].labels;
        assert_eq!(labels.num_levels(), 5);
        assert_eq!(labels.classifications[0].size(), vec![2, 1, 6]);
        assert_eq!(labels.classifications[4].size(), vec![32, 16, 6]);
        assert_eq!(labels.regressions[4].size(), vec![32, 16, 12]);

        // a second pass yields the same sequence
        let ids: Vec<_> = dataset
            .iter()?
            .map(|record| record.map(|record| record.image.id))
            .try_collect()?;
        assert_eq!(ids, vec![3, 1]);
        Ok(())
    }

    #[test]
    fn image_count_mismatch_is_fatal() -> Result<()> {
        let dataset = LabelDataset::new(
            coco()?,
            "/data/coco",
            make_levels(),
            AssignmentPolicy::Placeholder,
            Some(COCO_2017_TRAIN_NUM_IMAGES),
        )?;
        assert!(dataset.iter().is_err());
        Ok(())
    }

    #[test]
    fn records_are_lazy() -> Result<()> {
        let dataset = LabelDataset::new(
            coco()?,
            "/data/coco",
            make_levels(),
            AssignmentPolicy::max_iou(),
            None,
        )?;
        let mut records = dataset.iter()?;
        assert_eq!(records.len(), 2);

        let first = records.next().transpose()?;
        assert!(first.is_some());
        assert_eq!(records.len(), 1);
        Ok(())
    }
}
