use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;
use tokio::task::block_in_place;

use crate::capture::OpencvCamera;
use crate::cli::SubCommandExtend;
use crate::config::{CameraOptions, FaceOptions};
use crate::face::{self, OpencvFaceEngine, lock_engine};
use crate::gallery::GalleryStore;
use crate::{Opts, db, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub face: FaceOptions,
    #[command(flatten)]
    pub camera: CameraOptions,
    /// 监听地址
    #[arg(long, env = "ROLLCALL_ADDR", default_value = "127.0.0.1:5000")]
    pub addr: String,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        opts.data_dir.ensure()?;
        let pool = db::init_db(opts.data_dir.database()).await?;

        info!("加载人脸模型");
        let engine = face::shared(OpencvFaceEngine::create(&self.face)?);
        let gallery = block_in_place(|| {
            let mut engine = lock_engine(&engine);
            GalleryStore::open(opts.data_dir.gallery(), &mut **engine)
        })?;
        info!("人脸图库已加载：{} 个身份", gallery.identities().len());

        let device = Arc::new(OpencvCamera::new(self.camera.camera_index));
        let state = server::AppState::new(
            pool,
            opts.data_dir.clone(),
            engine,
            Arc::new(gallery),
            device,
            self.camera.clone(),
            self.face.tolerance,
        );

        let app = server::create_app(state.clone());

        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

        info!("正在停止后台任务");
        state.shutdown().await;
        info!("服务器已停止");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("无法监听退出信号: {}", e);
        std::future::pending::<()>().await;
    }
    info!("收到退出信号");
}
