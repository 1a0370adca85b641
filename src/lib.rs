pub mod api;
pub mod core;

pub fn init_logging() {
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("pano_extract"),
        );
    }

    #[cfg(not(target_os = "android"))]
    {
        // 重复调用时 try_init 返回错误，忽略即可
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
    }
}
