#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
	let code = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.unwrap()
		.block_on(async {
			let (args, _guard) = match mppdump::args() {
				Ok(parsed) => parsed,
				Err(err) => {
					eprintln!("{err:?}");
					return 1;
				}
			};
			let result = mppdump::run(args).await;
			if let Err(err) = &result {
				eprintln!("{err:?}");
			}
			mppdump::error::exit_code(&result)
		});
	std::process::exit(code);
}
