use anyhow::Result;
use clap::Parser;
use log::info;
use prettytable::{cell, row, Table};
use retinanet::{
    config::Config,
    dataset::{collate, LabelDataset},
    label::{Labels, IGNORE_VALUE},
    level::make_levels,
    model::{load_backbone_weights, RetinaNetInit},
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tch::{nn, Kind, Tensor};

#[derive(Debug, Clone, Parser)]
enum Opts {
    /// Print the pyramid levels and their anchor boxes.
    Levels,
    /// Print the targets of the first records of a dataset.
    Inspect {
        /// configuration file
        config_file: PathBuf,
        /// number of records to show
        #[clap(short = 'n', long, default_value = "8")]
        num_records: usize,
        /// decode images and check the model predictions against the targets
        #[clap(long)]
        forward: bool,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Opts::parse() {
        Opts::Levels => {
            levels();
        }
        Opts::Inspect {
            config_file,
            num_records,
            forward,
        } => {
            inspect(config_file, num_records, forward)?;
        }
    }

    Ok(())
}

fn levels() {
    let mut table = Table::new();
    table.add_row(row!["level", "stride", "anchor size", "aspect ratios", "anchor boxes"]);

    make_levels().iter().for_each(|level| {
        let ratios = level
            .anchor_aspect_ratios()
            .iter()
            .map(|ratio| format!("{}:{}", ratio.w, ratio.h))
            .collect::<Vec<_>>()
            .join(", ");
        let boxes = level
            .anchor_boxes()
            .iter()
            .map(|anchor| format!("{:.1}x{:.1}", anchor.width, anchor.height))
            .collect::<Vec<_>>()
            .join(", ");

        table.add_row(row![
            level.number(),
            level.stride(),
            level.anchor_size(),
            ratios,
            boxes
        ]);
    });

    table.printstd();
}

fn inspect(config_file: impl AsRef<Path>, num_records: usize, forward: bool) -> Result<()> {
    let config = Config::open(config_file)?;
    let levels = make_levels();
    let dataset = LabelDataset::open(&config.dataset, levels.clone())?;
    let num_classes = dataset.num_classes();
    info!("reading images from '{}'", dataset.dataset_dir().display());

    // class index table
    {
        let coco = dataset.coco();
        let names: HashMap<_, _> = coco
            .store()
            .categories()
            .map(|cat| (cat.id, cat.name.as_str()))
            .collect();

        let mut table = Table::new();
        table.add_row(row!["class index", "category id", "name"]);
        coco.category_ids()
            .iter()
            .enumerate()
            .for_each(|(index, id)| {
                table.add_row(row![index, id, names.get(id).copied().unwrap_or("")]);
            });
        table.printstd();
    }

    let model = if forward {
        let mut vs = nn::VarStore::new(config.model.device);
        let model = RetinaNetInit::new(&config.model, levels, num_classes).build(&vs.root())?;
        if let Some(path) = &config.model.backbone_weights {
            load_backbone_weights(&mut vs, path)?;
        }
        Some((vs, model))
    } else {
        None
    };

    let mut table = Table::new();
    table.add_row(row![
        "image id",
        "file",
        "size",
        "grid sizes",
        "positive anchors",
        "ignored anchors"
    ]);

    for record in dataset.iter()?.take(num_records) {
        let record = record?;
        let grid_sizes = record
            .labels
            .classifications
            .iter()
            .map(|grid| format!("{:?}", grid.size()))
            .collect::<Vec<_>>()
            .join(" ");
        let (positives, ignored) = count_anchors(&record.labels, num_classes);

        table.add_row(row![
            record.image.id,
            record.image_path.display(),
            format!("{}x{}", record.image.size.0, record.image.size.1),
            grid_sizes,
            positives,
            ignored
        ]);

        if let Some((vs, model)) = &model {
            let image_id = record.image.id;
            let batch = collate(&[record.load_image()?])?;
            let output = tch::no_grad(|| {
                model.forward_t(&batch.images.to_device(vs.device()), false)
            })?;
            output.check_against(&batch.labels)?;
            info!("predictions of image {} line up with the targets", image_id);
        }
    }

    table.printstd();
    Ok(())
}

fn count_anchors(labels: &Labels, num_classes: usize) -> (i64, i64) {
    let count = |value: f64| -> i64 {
        labels
            .classifications
            .iter()
            .map(|grid: &Tensor| grid.eq(value).sum(Kind::Int64).int64_value(&[]))
            .sum()
    };
    let positives = count(1.0);
    let ignored = count(IGNORE_VALUE as f64) / num_classes as i64;
    (positives, ignored)
}
