use std::env;

fn main() {
    // 告诉 cargo 在 build.rs 变化时重新运行
    println!("cargo:rerun-if-changed=build.rs");

    // 主机构建 (单元测试) 不需要任何链接配置
    if env::var_os("CARGO_FEATURE_ESP32S3").is_none() {
        return;
    }

    // esp-hal 1.0 已修复 App Descriptor 和链接脚本问题,
    // 只需添加 esp-hal 自带的 linkall.x
    println!("cargo:rustc-link-arg-bins=-Tlinkall.x");

    // 添加 ld 目录到链接路径（如果有自定义链接脚本）
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        println!("cargo:rustc-link-search={}/ld", manifest_dir);
    }
}
