use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{FaceOptions, Opts};
use crate::face::OpencvFaceEngine;
use crate::gallery::GalleryStore;
use crate::{db, students};

#[derive(Parser, Debug, Clone)]
pub struct GalleryCommand {
    #[command(flatten)]
    pub face: FaceOptions,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

/// 图库概况
#[derive(Debug, Serialize)]
pub struct GalleryReport {
    /// 每个身份及其人脸特征数量
    pub identities: Vec<(String, usize)>,
    /// 没有人脸图片的学生卡号
    pub unassigned: Vec<String>,
}

impl SubCommandExtend for GalleryCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        opts.data_dir.ensure()?;
        let pool = db::init_db(opts.data_dir.database()).await?;

        let mut engine = OpencvFaceEngine::create(&self.face)?;
        let gallery = block_in_place(|| GalleryStore::open(opts.data_dir.gallery(), &mut engine))?;

        let report = GalleryReport {
            identities: gallery.identities(),
            unassigned: students::list_unassigned(&pool, &gallery).await?,
        };
        print_report(&report, self.output_format)
    }
}

fn print_report(report: &GalleryReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?)
        }
        OutputFormat::Table => {
            for (identity, count) in &report.identities {
                println!("{}\t{}", identity, count);
            }
            if !report.unassigned.is_empty() {
                println!("unassigned\t{}", report.unassigned.join(","));
            }
        }
    }
    Ok(())
}
