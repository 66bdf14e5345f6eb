mod cache_and_network_suppression;
mod cache_policy_network_behavior;
mod coalesced_fetch;
mod dependency_rebuild;
mod suspension_window;
