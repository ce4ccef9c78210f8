use crate::{common::*, label::Labels};

/// Decode an image file into a `[height, width, 3]` float tensor in `[0, 1]`.
///
/// If `expected_size` is given as `(height, width)`, the decoded size must
/// agree with it.
pub fn load_image(path: impl AsRef<Path>, expected_size: Option<(usize, usize)>) -> Result<Tensor> {
    let path = path.as_ref();

    tch::no_grad(|| -> Result<_> {
        let image = vision::image::load(path)
            .with_context(|| format!("failed to decode image '{}'", path.display()))?;
        let (channels, height, width) = image.size3()?;
        ensure!(
            channels == 3,
            "expect 3 channels in '{}', but get {}",
            path.display(),
            channels
        );

        if let Some((expect_h, expect_w)) = expected_size {
            ensure!(
                (height, width) == (expect_h as i64, expect_w as i64),
                "image size of '{}' does not match, expect {:?}, but get {:?}",
                path.display(),
                (expect_h, expect_w),
                (height, width)
            );
        }

        let image = image.permute(&[1, 2, 0]).to_kind(Kind::Float) / 255.0;
        Ok(image.set_requires_grad(false))
    })
}

/// A decoded image with its targets.
#[derive(Debug)]
pub struct DataRecord {
    /// The image in `[height, width, 3]` layout.
    pub image: Tensor,
    pub labels: Labels,
}

/// A batch of equally sized records.
#[derive(Debug)]
pub struct Batch {
    /// The images in `[batch, 3, height, width]` layout.
    pub images: Tensor,
    /// The per-level targets in `[batch, height, width, channels]` layout.
    pub labels: Labels,
}

/// Stack records into a batch suitable for the model input.
pub fn collate(records: &[DataRecord]) -> Result<Batch> {
    ensure!(!records.is_empty(), "cannot collate an empty list of records");

    let first = &records[0];
    let image_size = first.image.size();
    let num_levels = first.labels.num_levels();

    records.iter().try_for_each(|record| {
        ensure!(
            record.image.size() == image_size,
            "image size mismatch in batch, expect {:?}, but get {:?}",
            image_size,
            record.image.size()
        );
        ensure!(
            record.labels.num_levels() == num_levels
                && record.labels.regressions.len() == num_levels,
            "number of levels mismatch in batch"
        );
        Ok(())
    })?;

    let images: Vec<_> = records.iter().map(|record| &record.image).collect();
    let images = Tensor::f_stack(&images, 0)?.permute(&[0, 3, 1, 2]);

    let stack = |tensors: Vec<&Tensor>| -> Result<Tensor> { Ok(Tensor::f_stack(&tensors, 0)?) };

    let classifications: Vec<_> = (0..num_levels)
        .map(|index| {
            stack(
                records
                    .iter()
                    .map(|record| &record.labels.classifications[index])
                    .collect(),
            )
        })
        .try_collect()?;
    let regressions: Vec<_> = (0..num_levels)
        .map(|index| {
            stack(
                records
                    .iter()
                    .map(|record| &record.labels.regressions[index])
                    .collect(),
            )
        })
        .try_collect()?;

    Ok(Batch {
        images,
        labels: Labels {
            classifications,
            regressions,
        },
    })
}
