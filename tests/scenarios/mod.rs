mod s1_cache_first_serves_from_cache;
mod s2_cache_and_network_stale_then_fresh;
mod s3_canonical_connection_stitches_pages;
mod s4_optimistic_commit_then_revert_undoes_commit;
mod s5_optimistic_revert_before_commit_restores_baseline;
mod s6_ssr_hydrate_skips_redundant_fetch;
