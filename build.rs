fn main() {
    prost_build::Config::new()
        .out_dir(std::env::var("OUT_DIR").unwrap())
        .compile_protos(&["proto/sparkplug_b.proto"], &["proto/"])
        .expect("failed to compile sparkplug_b.proto");
}
